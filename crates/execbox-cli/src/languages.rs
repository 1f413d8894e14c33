//! Languages command implementation for execbox CLI.

use execbox_core::language::{self, LanguageSpec};

use crate::colors;

/// Print the language registry with toolchain availability.
pub fn execute(json: bool) -> anyhow::Result<()> {
    let languages: Vec<_> = language::LANGUAGES.iter().map(LanguageSpec::info).collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&languages)?);
        return Ok(());
    }

    println!("\n{}Supported languages{}", colors::BOLD, colors::RESET);
    println!("{}", "─".repeat(50));
    for info in &languages {
        let (mark, color) = if info.available {
            ("✓", colors::GREEN)
        } else {
            ("✗", colors::RED)
        };
        let kind = if info.compiled { "compiled" } else { "interpreted" };
        println!(
            "  {}{}{} {:<12} {:<12} .{:<6} {}{}{}",
            color,
            mark,
            colors::RESET,
            info.id,
            info.name,
            info.extension,
            colors::DIM,
            kind,
            colors::RESET
        );
    }
    println!();

    Ok(())
}
