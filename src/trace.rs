use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::SubscriberInitExt;

/// Installs the global subscriber, writing to stderr.
///
/// `levels` is an `EnvFilter` directive such as `logforge=debug,codecs=info`,
/// an invalid one falls back to `info`. Calling it twice is harmless, the
/// first subscriber stays.
pub fn init(color: bool, json: bool, levels: &str) {
    let filter = EnvFilter::try_new(levels).unwrap_or_else(|err| {
        #[allow(clippy::print_stderr)]
        {
            eprintln!("invalid log level \"{levels}\", {err}, fallback to info");
        }

        EnvFilter::new("info")
    });

    let builder = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    let result = if json {
        builder.json().flatten_event(true).finish().try_init()
    } else {
        builder.with_ansi(color).finish().try_init()
    };

    if result.is_err() {
        debug!(message = "Global subscriber is already installed");
    }
}

/// The directive used when `LOGFORGE_LOG` is not set, `level` applies to
/// this crate and the codecs.
pub fn levels(level: &str) -> String {
    match level {
        "off" => "off".to_owned(),
        level => [
            format!("logforge={level}"),
            format!("codecs={level}"),
            "sqlx=warn".to_owned(),
        ]
        .join(","),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_crate_levels() {
        assert_eq!(levels("debug"), "logforge=debug,codecs=debug,sqlx=warn");
        assert_eq!(levels("off"), "off");
    }

    #[test]
    fn init_twice() {
        init(false, false, "logforge=trace");
        init(false, true, "not a [valid filter");
    }
}
