pub mod admin;
pub mod audit;
pub mod bridge;
pub mod cache;
pub mod gate;
pub mod tokens;

pub use admin::AdminService;
pub use audit::AuditSink;
pub use bridge::{
    BridgeState, MemberRole, MockConnector, RoleBridge, RoleCheck, RoleConnector, RoleStatus,
};
pub use cache::CacheStore;
pub use gate::{
    JoinAttempt, JoinOutcome, LinkOutcome, LoginAttempt, LoginDecision, PermissionGate,
};
pub use tokens::LinkTokenService;
