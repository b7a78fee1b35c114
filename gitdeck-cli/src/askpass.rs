//! Gitdeck askpass helper
//!
//! Git runs this with the prompt as its only argument and reads the answer
//! from stdout. The prompt is relayed to the credential session named by the
//! environment; a non-zero exit makes git abort the operation.

use gitdeck_core::credentials::askpass::{self, Reply, ADDR_ENV, TOKEN_ENV};

fn main() -> anyhow::Result<()> {
    let prompt = std::env::args().nth(1).unwrap_or_default();

    let addr = std::env::var(ADDR_ENV)
        .map_err(|_| anyhow::anyhow!("{} is not set; no credential session", ADDR_ENV))?;
    let token = std::env::var(TOKEN_ENV)
        .map_err(|_| anyhow::anyhow!("{} is not set; no credential session", TOKEN_ENV))?;

    // The session bounds the wait for credentials
    match askpass::ask(&addr, &token, &prompt, None)? {
        Reply::Answer(secret) => {
            println!("{}", secret);
            Ok(())
        }
        Reply::Abort(reason) => anyhow::bail!("credentials unavailable: {}", reason),
    }
}
