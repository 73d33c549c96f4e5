// Compiles opentrace-ebpf into OUT_DIR when the `ebpf` feature is on.
fn main() -> anyhow::Result<()> {
    #[cfg(feature = "ebpf")]
    {
        use anyhow::{anyhow, Context as _};
        use aya_build::cargo_metadata;

        let cargo_metadata::Metadata { packages, .. } = cargo_metadata::MetadataCommand::new()
            .no_deps()
            .exec()
            .context("MetadataCommand::exec")?;
        let ebpf_package = packages
            .into_iter()
            .find(|cargo_metadata::Package { name, .. }| name == "opentrace-ebpf")
            .ok_or_else(|| anyhow!("opentrace-ebpf package not found"))?;
        aya_build::build_ebpf([ebpf_package])?;
    }
    Ok(())
}
