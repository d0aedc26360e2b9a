pub mod warm_image;

pub use warm_image::{WarmImage, WarmImageSpec, WarmImageStatus};
