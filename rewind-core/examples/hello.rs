//! Record a few calls of `hello`, then replay them
//!
//! Run with `REWIND_MODE=record` first, then `REWIND_MODE=replay`.
//! Cases land in `.rewind/` unless `REWIND_ROOT` says otherwise.

use std::sync::Arc;

use rewind_core::prelude::*;

fn registry() -> Result<(Registry, RecordedFn)> {
    let registry = Registry::new();

    // stands in for a network lookup
    let whois = registry.boundary("whois", |_, inputs| {
        let to: String = inputs.arg(0)?;
        println!("  (whois {to} called)");
        Ok(json!(format!("{to} the Great")))
    })?;

    let hello = registry.recorded("hello", move |session, inputs| {
        let say: String = inputs.arg(0)?;
        let to: String = inputs.arg(1)?;
        if say.is_empty() {
            return Err(Raised::new("ValueError", "nothing to say").into());
        }
        let title = whois.call(session, &Inputs::from_args([json!(to)]))?;
        Ok(json!(format!("{say} {}", title.as_str().unwrap_or_default())))
    })?;

    Ok((registry, hello))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = RewindConfig::load()?;
    let (registry, hello) = registry()?;

    match config.mode {
        Mode::Replay => {
            let runner = ReplayRunner::new(config.store(), Arc::new(registry));
            let options = RunOptions::test().with_fast_path(config.fast_path);
            let summary = runner.run(&options)?;
            if !summary.passed() {
                std::process::exit(1);
            }
        }
        _ => {
            let session = Session::from_config(&config);
            for (say, to) in [("Hi", "World"), ("Hello", "Ada"), ("", "nobody")] {
                let inputs = Inputs::from_args([json!(say), json!(to)]);
                match hello.call(&session, &inputs) {
                    Ok(value) => println!("hello({say:?}, {to:?}) = {value}"),
                    Err(e) => println!("hello({say:?}, {to:?}) raised {e}"),
                }
            }
            println!("mode: {}, cases under {}", session.mode(), config.root.display());
        }
    }
    Ok(())
}
