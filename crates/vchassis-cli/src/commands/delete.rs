use super::{finish_provisioning, Invocation};
use vchassis_core::Provisioner;

pub fn run(inv: &Invocation) -> Result<u8, String> {
    let _lock = inv.lock()?;
    let provisioner = Provisioner::new(inv.runner.clone());

    let pb = inv.spinner(&format!("deleting topology '{}'...", inv.ctx.name()));
    let report = provisioner.delete(&inv.ctx, &inv.spec);
    finish_provisioning(&report, "deleted", pb.as_ref(), inv.json)
}
