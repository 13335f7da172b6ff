//! Lever-gated treasure handoff.
//!
//! The barbarian and the wizard each pull their lever on the gate signal.
//! The rogue, on its own gate signal, moves the treasure item by item and
//! only then lets both levers go, so a holder that sees its lever free again
//! also sees every item in the spoils.

use std::time::Duration;

use crate::bridge::protocol::LeverId;
use crate::config::Timings;
use crate::lever::{Lever, LeverError};
use crate::region::views::PickerView;

#[derive(Debug, thiserror::Error)]
pub enum HandoffError {
    #[error("lever {0:?} is not held, refusing to start the handoff")]
    NotHeld(LeverId),

    #[error(transparent)]
    Lever(#[from] LeverError),
}

/// Barbarian/wizard: pull the owned lever.
pub async fn hold(lever: &Lever, timings: &Timings) -> Result<(), LeverError> {
    lever
        .acquire(timings.lever_timeout, timings.poll_interval)
        .await?;
    tracing::info!(lever = %lever.name(), "Holding lever");
    Ok(())
}

/// Rogue: copy treasure into the spoils, then release lever two and lever one.
///
/// Returns the number of items moved.
pub async fn handoff(
    picker: PickerView<'_>,
    lever_one: &Lever,
    lever_two: &Lever,
    interval: Duration,
) -> Result<usize, HandoffError> {
    for lever in [lever_one, lever_two] {
        if lever.is_free()? {
            return Err(HandoffError::NotHeld(lever.id()));
        }
    }

    picker.clear_spoils();
    let treasure = picker.treasure();
    for (index, item) in treasure.iter().enumerate() {
        if index > 0 {
            tokio::time::sleep(interval).await;
        }
        picker.store_spoil(index, *item);
        tracing::debug!(index, item, "Looted item");
    }

    lever_two.release()?;
    lever_one.release()?;
    tracing::info!(items = treasure.len(), "Handoff complete, levers released");
    Ok(treasure.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ResourceNames, SessionId};
    use crate::lever;
    use crate::region::{DungeonLayout, TREASURE_SLOTS};

    struct Levers {
        names: ResourceNames,
        one: Lever,
        two: Lever,
    }

    impl Levers {
        fn open() -> Self {
            let names = ResourceNames::scoped(&SessionId::new());
            let one = Lever::open(LeverId::One, &names).unwrap();
            let two = Lever::open(LeverId::Two, &names).unwrap();
            Self { names, one, two }
        }
    }

    impl Drop for Levers {
        fn drop(&mut self) {
            let _ = lever::unlink(&self.names.lever_one);
            let _ = lever::unlink(&self.names.lever_two);
        }
    }

    fn fast_timings() -> Timings {
        Timings {
            lever_timeout: Duration::from_millis(200),
            ..Timings::default()
        }
    }

    #[tokio::test]
    async fn handoff_refuses_unheld_levers() {
        let levers = Levers::open();
        let layout = DungeonLayout::zeroed();
        hold(&levers.one, &fast_timings()).await.unwrap();

        let err = handoff(layout.picker(), &levers.one, &levers.two, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, HandoffError::NotHeld(LeverId::Two)));
        assert_eq!(layout.game().spoils_filled(), 0);
        assert!(!levers.one.is_free().unwrap());
    }

    #[tokio::test]
    async fn levers_are_released_only_after_every_item() {
        let levers = Levers::open();
        let layout = DungeonLayout::zeroed();
        let game = layout.game();
        game.write_treasure(b"GEMS");

        hold(&levers.one, &fast_timings()).await.unwrap();
        hold(&levers.two, &fast_timings()).await.unwrap();

        // Independent handles, as a holder process would have.
        let watch_one = Lever::open(LeverId::One, &levers.names).unwrap();
        let watch_two = Lever::open(LeverId::Two, &levers.names).unwrap();

        let observer = async {
            let mut polls = 0u32;
            loop {
                let freed = watch_one.is_free().unwrap() || watch_two.is_free().unwrap();
                let filled = game.spoils_filled();
                if freed {
                    assert_eq!(filled as usize, TREASURE_SLOTS);
                    return polls;
                }
                polls += 1;
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        };

        let (moved, polls) = tokio::join!(
            handoff(layout.picker(), &levers.one, &levers.two, Duration::from_millis(10)),
            observer
        );
        assert_eq!(moved.unwrap(), TREASURE_SLOTS);
        assert!(polls > 0);
        assert_eq!(&game.spoils(), b"GEMS");
        assert!(watch_one.is_free().unwrap());
        assert!(watch_two.is_free().unwrap());
    }

    #[tokio::test]
    async fn second_hold_times_out() {
        let levers = Levers::open();
        let timings = Timings {
            lever_timeout: Duration::from_millis(20),
            ..Timings::default()
        };
        hold(&levers.two, &timings).await.unwrap();
        assert!(matches!(
            hold(&levers.two, &timings).await,
            Err(LeverError::Timeout { .. })
        ));
    }
}
