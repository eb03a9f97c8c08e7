//! External task-service integration.
//!
//! An OAuth2-authenticated HTTP client, a tool-calling sub-agent that the
//! main dialogue delegates task requests to, and a background poller that
//! proactively reminds the user about due tasks.

pub mod agent;
pub mod client;
pub mod oauth;
pub mod poller;

pub use agent::{TaskAgent, ToolExecutor, TASK_KEYWORDS};
pub use client::TaskServiceClient;
pub use oauth::OAuthSession;
pub use poller::TaskPoller;
