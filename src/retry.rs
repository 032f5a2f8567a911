macro_rules! retry_fetch {
    ($context:expr, $operation:expr) => {{
        const MAX_ATTEMPTS: u32 = 3;
        const BASE_DELAY_MS: u64 = 500;

        let context_value: String = $context.into();
        let mut attempt = 1;

        loop {
            match ($operation).await {
                Ok(value) => break Ok(value),
                Err(err) if attempt >= MAX_ATTEMPTS => break Err(err),
                Err(err) => {
                    let delay_ms = BASE_DELAY_MS * 2_u64.pow(attempt - 1);
                    let jitter = fastrand::u64(0..=delay_ms / 4);
                    log::warn!(
                        "Attempt {}/{} for {} failed: {}. Retrying in {}ms.",
                        attempt,
                        MAX_ATTEMPTS,
                        context_value,
                        err,
                        delay_ms + jitter
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms + jitter)).await;
                    attempt += 1;
                }
            }
        }
    }};
}

pub(crate) use retry_fetch;
