//! Executes steps in registry order, timing each and appending to the
//! shared run log.

use std::time::Instant;

use tracing::{error, info};

use crate::error::{Result, StepError};
use crate::pipeline::{runlog, script_label, Step, StepContext};

/// Which steps to run: a contiguous range, or a single step.
#[derive(Debug, Default, Clone)]
pub struct Selection {
    pub from: Option<String>,
    pub to: Option<String>,
    pub only: Option<String>,
}

/// Resolve a selection against the registry, preserving order.
pub fn select<'a>(
    registry: &'a [Box<dyn Step>],
    selection: &Selection,
) -> Result<Vec<&'a dyn Step>> {
    if let Some(ref only) = selection.only {
        let idx = locate(registry, only)?;
        return Ok(vec![registry[idx].as_ref()]);
    }
    let from = match selection.from {
        Some(ref token) => locate(registry, token)?,
        None => 0,
    };
    let to = match selection.to {
        Some(ref token) => locate(registry, token)?,
        None => registry.len() - 1,
    };
    if from > to {
        return Err(StepError::InvalidRange(format!(
            "start step {} is after end step {}",
            registry[from].seq(),
            registry[to].seq()
        ))
        .into());
    }
    Ok(registry[from..=to].iter().map(|s| s.as_ref()).collect())
}

fn locate(registry: &[Box<dyn Step>], token: &str) -> Result<usize> {
    let by_seq = token.parse::<u16>().ok();
    registry
        .iter()
        .position(|step| step.slug() == token || Some(step.seq()) == by_seq)
        .ok_or_else(|| StepError::Unknown(token.to_string()).into())
}

/// Run the selected steps in order. The first failure aborts the run; steps
/// already completed keep their run-log rows.
pub async fn run(ctx: &StepContext, steps: &[&dyn Step]) -> Result<()> {
    for step in steps {
        let label = script_label(*step);
        info!(step = %label, task = step.task(), "commencing step");
        let started = Instant::now();

        if let Err(e) = step.run(ctx).await {
            error!(step = %label, error = %e, "step failed");
            return Err(StepError::Failed {
                step: label,
                detail: e.to_string(),
            }
            .into());
        }

        let duration_mins = started.elapsed().as_secs_f64() / 60.0;
        runlog::append(&ctx.run_log, &label, step.task(), duration_mins)?;
        info!(
            step = %label,
            duration_mins = format!("{duration_mins:.2}"),
            "step complete"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::steps;

    #[test]
    fn select_defaults_to_whole_registry() {
        let registry = steps::registry();
        let selected = select(&registry, &Selection::default()).unwrap();
        assert_eq!(selected.len(), registry.len());
    }

    #[test]
    fn select_by_slug_and_sequence() {
        let registry = steps::registry();
        let only = select(
            &registry,
            &Selection {
                only: Some("sausage-buffers".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].seq(), 6);

        let range = select(
            &registry,
            &Selection {
                from: Some("6".into()),
                to: Some("9".into()),
                only: None,
            },
        )
        .unwrap();
        assert_eq!(range.len(), 4);
        assert_eq!(range[0].slug(), "sausage-buffers");
        assert_eq!(range[3].slug(), "od-open-space");
    }

    #[test]
    fn select_rejects_unknown_and_inverted_ranges() {
        let registry = steps::registry();
        let unknown = select(
            &registry,
            &Selection {
                only: Some("nope".into()),
                ..Default::default()
            },
        );
        assert!(matches!(unknown, Err(Error::Step(StepError::Unknown(_)))));

        let inverted = select(
            &registry,
            &Selection {
                from: Some("9".into()),
                to: Some("6".into()),
                only: None,
            },
        );
        assert!(matches!(inverted, Err(Error::Step(StepError::InvalidRange(_)))));
    }
}
