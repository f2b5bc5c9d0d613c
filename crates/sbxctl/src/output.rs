//! Terminal output - ASCII-only status lines on stdout, errors on stderr

use owo_colors::OwoColorize;
use sbx_common::InstalledBinary;

pub fn display_error(message: &str) {
    eprintln!();
    eprintln!("[ERROR] {}", message.red());
    eprintln!();
}

pub fn display_warning(message: &str) {
    eprintln!("[WARNING] {}", message.yellow());
}

pub fn display_success(message: &str) {
    println!("[OK] {}", message.bright_green());
}

pub fn display_installed(binaries: &[InstalledBinary]) {
    for binary in binaries {
        display_success(&format!(
            "{} {} -> {}",
            binary.name,
            binary.version,
            binary.path.display()
        ));
    }
}
