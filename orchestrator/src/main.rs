use std::{env, io, time::Duration};

use log::{info, warn};
use machine_learning::arch::PixelLinear;
use orchestrator::{Session, TrainingConfig};

fn main() -> io::Result<()> {
    env_logger::init();

    let Some(path) = env::args().nth(1) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "usage: seg-train <config.json>",
        ));
    };

    let config = TrainingConfig::from_path(&path)?;
    config.validate()?;

    let provider = config
        .dataset
        .provider(config.batch_size, config.nclasses, config.random_seed)?;
    let model = PixelLinear::new(config.dataset.channels(), config.nclasses);

    let outcome = Session::new(config, model, &provider)?
        .with_progress(true)
        .run()?;

    match outcome.best_valid_miou {
        Some(best) => info!("Best: Mean Class IoU - Valid {best:.5}"),
        None => warn!("no validation pass ran"),
    }
    info!("Total time elapsed: {}", hms(outcome.elapsed));

    Ok(())
}

fn hms(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_time_is_hours_minutes_seconds() {
        assert_eq!(hms(Duration::from_millis(59_900)), "0:00:59");
        assert_eq!(hms(Duration::from_secs(3 * 3600 + 7 * 60 + 5)), "3:07:05");
        assert_eq!(hms(Duration::from_secs(100 * 3600)), "100:00:00");
    }
}
