use crate::cli::{actions::Action, globals::GlobalArgs};
use crate::tecmise::new;
use anyhow::Result;
use url::Url;

/// Handle the server action
pub async fn handle(action: Action, globals: &GlobalArgs) -> Result<()> {
    match action {
        Action::Server { port, dsn } => {
            // Fail early on an unparseable DSN instead of inside the pool
            let dsn = Url::parse(&dsn)?;

            new(port, dsn.to_string(), globals.clone()).await?;
        }
    }

    Ok(())
}
