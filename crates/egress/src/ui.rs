//! Console output helpers.
//!
//! User-facing progress goes to stdout here; diagnostics go through `tracing`.

use colored::Colorize;

use crate::connectivity::ConnectivityReport;

/// Print the tool banner.
pub fn print_banner() {
    println!();
    println!("{}", "  AKS Static Egress Gateway".cyan().bold());
    println!(
        "  {}",
        "kube-egress-gateway on a dedicated node pool".bright_black()
    );
    println!();
}

/// Print a section header.
pub fn print_section(title: &str) {
    println!();
    println!("{}", "═".repeat(70).bright_black());
    println!("{}", title.cyan().bold());
    println!("{}", "═".repeat(70).bright_black());
    println!();
}

/// Print a progress step with step number.
pub fn print_progress_step(current: u8, total: u8, message: &str) {
    println!(
        "{} {} {}",
        format!("[{current}/{total}]").bright_black(),
        "▶".cyan(),
        message.bold()
    );
}

/// Print a success message.
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message.green());
}

/// Print a warning message.
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message.yellow());
}

/// Print an error message.
pub fn print_error(message: &str) {
    println!("{} {}", "✗".red().bold(), message.red());
}

/// Print an info message.
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print prerequisite check result.
pub fn print_check_result(name: &str, passed: bool, message: Option<&str>) {
    let status = if passed { "✓".green() } else { "✗".red() };

    let text = if let Some(msg) = message {
        format!("{name} - {msg}")
    } else {
        name.to_string()
    };

    println!("  {status} {text}");
}

/// Print a key-value pair.
pub fn print_kv(key: &str, value: &str) {
    println!("  {} {}", format!("{key}:").bright_black(), value.green());
}

/// Print the source addresses the target saw.
pub fn print_connectivity_report(report: &ConnectivityReport) {
    println!();
    print_kv("Target", &report.target);
    for observation in [&report.gateway_pod, &report.plain_pod] {
        let source = observation
            .source
            .map_or_else(|| "<none>".to_string(), |ip| ip.to_string());
        print_kv(
            &observation.pod,
            &format!("{source} ({})", observation.class),
        );
    }
    println!();

    let failures = report.failures();
    if failures.is_empty() {
        print_success("Gateway pod egresses from the egress subnet; plain pod does not");
    } else {
        for failure in failures {
            print_error(&failure);
        }
    }
}
