use super::{finish_provisioning, Invocation};
use vchassis_core::Provisioner;

pub fn run(inv: &Invocation) -> Result<u8, String> {
    let _lock = inv.lock()?;
    let provisioner = Provisioner::new(inv.runner.clone())
        .with_link_polling(inv.settings.link_polling.to_config());

    let pb = inv.spinner(&format!("creating topology '{}'...", inv.ctx.name()));
    let report = provisioner.create(&inv.ctx, &inv.spec);
    let code = finish_provisioning(&report, "created", pb.as_ref(), inv.json)?;

    if !inv.json {
        for instance in report.instances.values() {
            let wired = instance.ready_interfaces.len() - instance.unassigned().count();
            println!(
                "  {:<12} {:<24} {} interfaces, {} wired",
                instance.instance_id,
                instance.process_handle,
                instance.ready_interfaces.len(),
                wired
            );
        }
    }
    Ok(code)
}
