use std::{fmt, path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use typed_builder::TypedBuilder;

use crate::{
    config::ConnectionSettings, counters::ExecutionCounters, error::BoxError,
    session::SessionState,
};

/// Outcome of an action that did not complete normally.
#[derive(Debug)]
pub enum ActionError {
    /// Ends the current iteration early. Not counted as an error.
    Abort,
    /// A genuine failure, counted and reported.
    Failed(BoxError),
}

impl ActionError {
    pub fn failed(err: impl Into<BoxError>) -> Self {
        Self::Failed(err.into())
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abort => f.write_str("iteration aborted"),
            Self::Failed(err) => write!(f, "{err}"),
        }
    }
}

impl<E> From<E> for ActionError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self::Failed(Box::new(err))
    }
}

/// One scripted step of a simulated user.
///
/// Actions run strictly in sequence order within an iteration. Any I/O they
/// perform is a suspension point of the user's task, long running actions
/// should watch [`SessionState::signal`] to stop promptly on cancellation.
///
/// # Example
/// ```rust
/// use stampede::{Action, ActionError, ConnectionSettings, SessionState};
///
/// struct Think;
///
/// #[async_trait::async_trait]
/// impl Action for Think {
///     fn label(&self) -> &str {
///         "think"
///     }
///
///     async fn execute(
///         &self,
///         session: &mut SessionState,
///         _connection: &ConnectionSettings,
///     ) -> Result<(), ActionError> {
///         let ms = session.rand().rand_range(10, 50).map_err(ActionError::failed)?;
///         tokio::time::sleep(std::time::Duration::from_millis(ms as u64)).await;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Action: Send + Sync {
    /// Name used in logs and errors.
    fn label(&self) -> &str;

    async fn execute(
        &self,
        session: &mut SessionState,
        connection: &ConnectionSettings,
    ) -> Result<(), ActionError>;
}

/// Identity a simulated user runs as.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct User {
    pub name: String,
    pub password: Option<String>,
}

impl User {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: None,
        }
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Hands out user identities, called once per new session.
pub trait UserSource: Send + Sync {
    fn next(&self, counters: &ExecutionCounters) -> User;
}

/// Everything a scheduler needs to run: the action sequence and the
/// collaborators every simulated user shares.
#[derive(Clone, TypedBuilder)]
pub struct Scenario {
    #[builder(setter(into))]
    pub name: String,
    pub actions: Vec<Arc<dyn Action>>,
    pub users: Arc<dyn UserSource>,
    #[builder(default)]
    pub connection: ConnectionSettings,
    /// Where actions may write artifacts
    #[builder(default = PathBuf::from("."), setter(into))]
    pub outputs_dir: PathBuf,
    /// Upper bound for a single action, exceeding it fails the action
    #[builder(default = Duration::from_secs(300))]
    pub action_timeout: Duration,
}

impl fmt::Debug for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<&str> = self.actions.iter().map(|a| a.label()).collect();
        f.debug_struct("Scenario")
            .field("name", &self.name)
            .field("actions", &labels)
            .field("connection", &self.connection)
            .field("outputs_dir", &self.outputs_dir)
            .field("action_timeout", &self.action_timeout)
            .finish()
    }
}
