//! Startup banner and the goodbye line.

use owo_colors::OwoColorize;

const LOGO: &str = r"
 ██████╗  █████╗ ██╗███╗   ██╗
 ██╔══██╗██╔══██╗██║████╗  ██║
 ██████╔╝███████║██║██╔██╗ ██║
 ██╔══██╗██╔══██║██║██║╚██╗██║
 ██║  ██║██║  ██║██║██║ ╚████║
 ╚═╝  ╚═╝╚═╝  ╚═╝╚═╝╚═╝  ╚═══╝";

const TAGLINE: &str = "system information at a glance";

pub fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");
    if console::colors_enabled() {
        println!("{}", LOGO.cyan().bold());
        println!("{}", format!(" {TAGLINE} (v{version})").dimmed());
    } else {
        println!("{LOGO}");
        println!(" {TAGLINE} (v{version})");
    }
    println!();
}

pub fn print_goodbye() {
    if console::colors_enabled() {
        println!("{}", "Stay dry out there.".dimmed());
    } else {
        println!("Stay dry out there.");
    }
}
