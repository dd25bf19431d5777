/**
 * Access control: permissions, principals and the
 *  evaluator that folds ownership and share grants
 *  into an effective permission.
 */
pub mod acl;
/**
 * Sign-in seams. Credential checks are delegated to
 *  an external verifier; a successful sign-in makes
 *  sure the principal has a root folder.
 */
pub mod auth;
/**
 * Background jobs: bulk moves and copies, archive
 *  builds and grant sweeps, run off the request path.
 */
pub mod jobs;
/**
 * Share grants and the operations that issue,
 *  revoke and look them up.
 */
pub mod share;
/**
 * Helper for reporting build version information.
 */
pub mod version;
/**
 * The node tree, path resolution and the
 *  transactional mutation engine.
 */
pub mod vfs;

pub mod prelude {
    pub use crate::acl::{Permission, PrincipalId};
    pub use crate::jobs::{Job, JobDispatcher, JobError, JobId, JobStatus, PendingJob};
    pub use crate::share::{Audience, GrantScope, GrantSpec, GrantToken, ShareGrant};
    pub use crate::version::build_info;
    pub use crate::vfs::{
        ContentStore, Node, NodeId, NodeKind, TreeStore, UploadOptions, Vfs, VfsConfig, VfsError,
        VfsPath,
    };
}
