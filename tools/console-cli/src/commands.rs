//! Subcommand implementations.

use std::io::BufRead;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use console_link::{
    actions, CallerQueue, ConnectionState, ConsoleClient, Credential, CredentialRecord,
    CredentialStore, LoginOutcome, Response,
};
use tracing::{info, warn};

pub struct Session {
    pub client: ConsoleClient,
    pub store: CredentialStore,
    pub connect_wait: Duration,
}

impl Session {
    pub async fn login(&self, login: String, remember: bool) -> Result<ExitCode> {
        let credential = Credential::from_password(login, read_password()?)?;
        self.connected().await?;

        match self.client.login(&credential).await {
            LoginOutcome::Accepted { user } => {
                match user {
                    Some(user) => println!("logged in as {}", serde_json::to_string(&user)?),
                    None => println!("logged in as {}", credential.login()),
                }
                if remember {
                    self.store
                        .save(&CredentialRecord::new(&credential, true))
                        .context("failed to save credential")?;
                    info!(path = %self.store.path().display(), "Credential remembered");
                } else {
                    self.store.clear().context("failed to clear credential")?;
                }
                Ok(ExitCode::SUCCESS)
            }
            LoginOutcome::Rejected { message } => {
                eprintln!("login rejected: {message}");
                Ok(ExitCode::FAILURE)
            }
            LoginOutcome::Failed(e) => Err(e).context("login did not complete"),
        }
    }

    pub async fn request(
        &self,
        action: &str,
        params: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ExitCode> {
        if !actions::is_known(action) {
            warn!(action, "Action is not in the known vocabulary, sending anyway");
        }
        let params: serde_json::Value = match params {
            Some(text) => serde_json::from_str(text).context("--params is not valid JSON")?,
            None => serde_json::Value::Null,
        };

        self.connected().await?;
        self.login_with_stored().await?;

        let pending = match timeout {
            Some(timeout) => self.client.send_request_timeout(action, params, timeout)?,
            None => self.client.send_request(action, params)?,
        };
        let response = pending.await.with_context(|| format!("{action} failed"))?;
        print_response(&response)?;

        Ok(if response.is_success() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        })
    }

    pub async fn watch(&self, queue: &mut CallerQueue, duration: Duration) -> Result<ExitCode> {
        self.client.on_connectivity(|state: ConnectionState| {
            println!("connection: {state}");
        });
        println!("connection: {}", self.client.state());

        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                more = queue.run_next() => if !more { break },
            }
        }
        Ok(ExitCode::SUCCESS)
    }

    pub async fn ping(&self) -> Result<ExitCode> {
        self.connected().await?;
        let started = Instant::now();
        let response = self.client.send_request(actions::PING, ())?.await?;
        let elapsed = started.elapsed();
        if !response.is_success() {
            print_response(&response)?;
            return Ok(ExitCode::FAILURE);
        }
        println!(
            "pong from {} in {:.1} ms",
            self.client.config().endpoint,
            elapsed.as_secs_f64() * 1000.0
        );
        Ok(ExitCode::SUCCESS)
    }

    async fn connected(&self) -> Result<()> {
        self.client
            .wait_until_connected(self.connect_wait)
            .await
            .with_context(|| format!("could not reach {}", self.client.config().endpoint))
    }

    /// Log in first if a remembered credential exists.
    async fn login_with_stored(&self) -> Result<()> {
        let Some(record) = self.store.load().context("failed to read credential")? else {
            return Ok(());
        };
        if !record.remember {
            return Ok(());
        }
        let credential = record.credential().context("stored credential is invalid")?;
        match self.client.login(&credential).await {
            LoginOutcome::Accepted { .. } => {
                info!(login = %credential.login(), "Logged in with stored credential");
                Ok(())
            }
            LoginOutcome::Rejected { message } => {
                bail!("stored credential rejected: {message}")
            }
            LoginOutcome::Failed(e) => Err(e).context("login did not complete"),
        }
    }
}

fn read_password() -> Result<String> {
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password from stdin")?;
    let len = line.trim_end_matches(['\r', '\n']).len();
    line.truncate(len);
    if line.is_empty() {
        bail!("empty password on stdin");
    }
    Ok(line)
}

fn print_response(response: &Response) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(response)?);
    Ok(())
}
