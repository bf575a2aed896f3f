use super::{json_pretty, pass_fail, spin_fail, spin_ok, Invocation, EXIT_SUCCESS};
use vchassis_core::Verifier;

/// Always exits successfully; the verdict is in the output.
pub fn run(inv: &Invocation) -> Result<u8, String> {
    let verifier = Verifier::from_settings(inv.runner.clone(), &inv.settings);

    let pb = inv.spinner(&format!("verifying topology '{}'...", inv.ctx.name()));
    let report = verifier.verify(&inv.ctx, &inv.spec);
    let failed = report.failures().len();
    if let Some(ref pb) = pb {
        if failed == 0 {
            spin_ok(pb, "checks finished");
        } else {
            spin_fail(pb, "checks finished with failures");
        }
    }

    if inv.json {
        let payload = serde_json::json!({
            "topology": report.topology,
            "passed": report.passed(),
            "checks": report.checks,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        for check in &report.checks {
            println!(
                "{} {:<12} {:<16} {}",
                pass_fail(check.passed),
                check.kind.to_string(),
                check.subject,
                check.detail
            );
        }
        println!(
            "{}/{} checks passed for topology '{}'",
            report.checks.len() - failed,
            report.checks.len(),
            report.topology
        );
    }
    Ok(EXIT_SUCCESS)
}
