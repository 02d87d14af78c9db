mod login;
mod middleware;
mod provider;
mod registration;
mod response;
mod session;

pub use login::{Flow, LoginError, LoginHandler, LoginOutcome, LoginQuery, RequestContext};
pub use middleware::{CurrentUser, current_user, require_user};
pub use provider::{
    Provider, ProviderIdentity, PulsOAuthClient, SocialLoginClient, UnknownProvider,
};
pub use registration::Registration;
pub use response::{ClientKind, LoginResponse, ResponseFactory};
pub use session::{AuthSession, PendingState, SESSION_COOKIE, STATE_TTL, generate_session_id};
