//! Services layer for cla-service.
//!
//! Identity policy, verification codes, the signing-record store adapters and
//! the manager and corporation signing lifecycles.

pub mod clock;
mod database;
pub mod email;
pub mod error;
mod jwt;
pub mod manager;
pub mod memory;
pub mod policy;
pub mod signing;
pub mod store;
pub mod verification;

pub use clock::{Clock, ManualClock, SystemClock};
pub use database::ClaDb;
pub use email::{
    EmailMessage, EmailProvider, EmailTemplate, LogEmailService, MockEmailService, SmtpEmailService,
};
pub use error::{ServiceError, StatusClass};
pub use jwt::{JwtService, ManagerClaims};
pub use manager::{ManagerService, NewManager};
pub use memory::{MemoryCodeStore, MemorySigningStore};
pub use policy::IdentityPolicy;
pub use signing::CorpSigningService;
pub use store::{CodeStore, SigningStore};
pub use verification::VerificationCodeIssuer;
