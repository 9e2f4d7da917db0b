//! Renders the SpireServer CRD.
//!
//! Run this from the `spire-core` dir whenever the CRD types change, so that the manifest which
//! ships alongside the operator stays in sync.

use anyhow::{Context, Result};
use kube::CustomResourceExt;
use spire_core::crd::SpireServer;

fn main() -> Result<()> {
    let canon = std::fs::canonicalize("..").context("error getting canonical path of current dir")?;
    let crds_path = canon.join("spire-operator").join("manifests").join("crds");
    std::fs::create_dir_all(&crds_path).with_context(|| format!("error creating dir {:?}", &crds_path))?;

    let crd = SpireServer::crd();
    let crd_yaml = serde_yaml::to_string(&crd).context("error serializing SpireServer CRD to yaml")?;
    let out = crds_path.join("spireserver.yaml");
    std::fs::write(&out, &crd_yaml).with_context(|| format!("error writing SpireServer CRD to {:?}", &out))?;
    println!("SpireServer CRD written to {:?}", &out);

    Ok(())
}
