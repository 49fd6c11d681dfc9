pub mod file;

pub mod user;
pub use user::{CredentialCheck, NewUser, PublicUser, Role, UserPatch, UserStore, UserStoreError};

pub mod invite;
pub use invite::{Invite, InviteDetails, InviteError, InviteStore, NewInvite};
