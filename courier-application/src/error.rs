use courier_domain::error::MessagingError;

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("messaging: {0}")]
    Messaging(#[from] MessagingError),

    #[error("infra: {0}")]
    Infra(String),

    #[error("no unit of work: {0}")]
    NoUnitOfWork(&'static str),

    #[error("handler already registered: event={event}, handler={handler}")]
    AlreadyRegisteredHandler {
        event: &'static str,
        handler: String,
    },
}

pub type AppResult<T> = Result<T, AppError>;
