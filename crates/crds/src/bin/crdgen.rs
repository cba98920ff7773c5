//! Prints the `CustomResourceDefinition` manifests for `Pool` and `IP`.
//!
//! Run and redirect to a file, then `kubectl apply -f` it before starting
//! the controller.

use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    let pool = serde_yaml::to_string(&crds::Pool::crd())?;
    let ip = serde_yaml::to_string(&crds::IP::crd())?;
    println!("{pool}---\n{ip}");
    Ok(())
}
