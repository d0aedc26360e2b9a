//! Print the WarmImage CRD manifest: `crdgen | kubectl apply -f -`.

use kube::core::CustomResourceExt;
use warmimage_controller::crd::WarmImage;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&WarmImage::crd())?);
    Ok(())
}
