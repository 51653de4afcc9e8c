//! # Custom Resource Definitions
//!
//! CRD types for the Aqua operator.
//!
//! ## Module Structure
//!
//! - `common.rs` - Specification building blocks shared by every entity
//! - `status.rs` - Lifecycle state and the status document
//! - `csp.rs` - The `AquaCsp` composite
//! - `database.rs`, `gateway.rs`, `server.rs` - Platform tiers
//! - `enforcer.rs`, `kube_enforcer.rs`, `starboard.rs` - Enforcement tiers

mod common;
mod csp;
mod database;
mod enforcer;
mod gateway;
mod kube_enforcer;
mod server;
mod starboard;
mod status;

pub use common::{
    CommonSpec, DeploymentSpec, ExternalDbSpec, GatewayAddress, ImageSpec, InfrastructureSpec,
    SecretRef,
};
pub use csp::{AquaCsp, AquaCspSpec, CspEnforcerSpec, CspKubeEnforcerSpec};
pub use database::{AquaDatabase, AquaDatabaseSpec};
pub use enforcer::{AquaEnforcer, AquaEnforcerSpec};
pub use gateway::{AquaGateway, AquaGatewaySpec};
pub use kube_enforcer::{AquaKubeEnforcer, AquaKubeEnforcerSpec, WebhookCertificates};
pub use server::{AquaServer, AquaServerSpec};
pub use starboard::{AquaStarboard, AquaStarboardSpec, StarboardConfig, StarboardDetails};
pub use status::{EntityStatus, LifecycleState};
