//! Plain-text rendering of a pipeline outcome.

use std::fmt::Write as _;

use portfolio_shared::{PipelineOutcome, PortfolioResult, StageWarning};

pub(crate) fn render_text(outcome: &PipelineOutcome) -> String {
    match outcome {
        PipelineOutcome::Success { portfolio } => render_portfolio(portfolio),
        PipelineOutcome::PartialFailure {
            portfolio,
            warnings,
        } => {
            let mut out = render_portfolio(portfolio);
            out.push_str(&render_warnings(warnings));
            out
        }
        PipelineOutcome::Failure { kind, message } => format!("Error [{kind}]: {message}"),
    }
}

fn render_portfolio(p: &PortfolioResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", p.company_name);
    if let Some(tagline) = &p.tagline {
        let _ = writeln!(out, "{tagline}");
    }
    let _ = writeln!(out, "\n{}", p.summary);
    if let Some(industry) = &p.industry {
        let _ = writeln!(out, "\nIndustry: {industry}");
    }

    let _ = writeln!(out, "\nOfferings:");
    for item in &p.offerings {
        let _ = writeln!(out, "  - {item}");
    }
    let _ = writeln!(out, "\nHighlights:");
    for item in &p.highlights {
        let _ = writeln!(out, "  - {item}");
    }
    if !p.technology_stack.is_empty() {
        let _ = writeln!(out, "\nTechnology: {}", p.technology_stack.join(", "));
    }
    if !p.leadership.is_empty() {
        let _ = writeln!(out, "\nLeadership:");
        for person in &p.leadership {
            let _ = writeln!(out, "  - {person}");
        }
    }

    let contact = &p.contact;
    if !contact.is_empty() {
        let _ = writeln!(out, "\nContact:");
        for email in &contact.emails {
            let _ = writeln!(out, "  Email: {email}");
        }
        for phone in &contact.phones {
            let _ = writeln!(out, "  Phone: {phone}");
        }
        for address in &contact.addresses {
            let _ = writeln!(out, "  Address: {address}");
        }
        for (network, url) in &contact.socials {
            let _ = writeln!(out, "  {network}: {url}");
        }
        if let Some(logo) = &contact.logo {
            let _ = writeln!(out, "  Logo: {logo}");
        }
    }

    let _ = write!(
        out,
        "\nSource: {} (generated {})",
        p.source_url,
        p.generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    out
}

fn render_warnings(warnings: &[StageWarning]) -> String {
    let mut out = format!(
        "\n\nNote: sourcing is incomplete, {} page(s) could not be used:",
        warnings.len()
    );
    for w in warnings {
        let _ = write!(
            out,
            "\n  - {} ({}): {}",
            w.url.as_deref().unwrap_or("-"),
            w.kind,
            w.message
        );
    }
    out
}
