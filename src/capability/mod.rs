//! 可插拔能力：角色、注册表、调用缓存与脚本化实现

mod cache;
mod registry;
pub mod scripted;
mod types;

pub use cache::CapabilityCache;
pub use registry::{Capability, CapabilityRegistry, CapabilityRole};
pub use types::{CapabilityInput, CapabilityOutput, ReplanDirective};
