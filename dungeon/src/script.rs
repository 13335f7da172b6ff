//! The routine the orchestrator runs once every worker is ready.

use async_trait::async_trait;

use crate::game::GameHandle;
use crate::handlers::compute::caesar_encrypt;
use crate::handlers::negotiation::NegotiationStatus;
use crate::region::TREASURE_SLOTS;

/// A dungeon run, driven through the orchestrator's [`GameHandle`].
#[async_trait]
pub trait DungeonScript: Send + Sync {
    async fn run(&self, game: &GameHandle<'_>) -> anyhow::Result<()>;
}

/// Attack, dispel, pick the lock, loot, leave.
#[derive(Debug, Clone)]
pub struct ClassicDungeon {
    pub enemy_health: i32,
    pub spell_key: u8,
    pub spell: String,
    pub lock_target: f32,
    pub treasure: [u8; TREASURE_SLOTS],
}

impl Default for ClassicDungeon {
    fn default() -> Self {
        Self {
            enemy_health: 100,
            spell_key: 7,
            spell: "Begone, foul guardian of the deep".to_string(),
            lock_target: 217.5,
            treasure: *b"GEMS",
        }
    }
}

#[async_trait]
impl DungeonScript for ClassicDungeon {
    async fn run(&self, game: &GameHandle<'_>) -> anyhow::Result<()> {
        let attack = game.attack(self.enemy_health).await?;
        anyhow::ensure!(
            attack == self.enemy_health,
            "barbarian attacked for {attack}, expected {}",
            self.enemy_health
        );

        let cipher = caesar_encrypt(self.spell_key, self.spell.as_bytes())?;
        let plaintext = game.dispel(self.spell_key, &cipher).await?;
        anyhow::ensure!(
            plaintext == self.spell.as_bytes(),
            "wizard decrypted {:?}",
            String::from_utf8_lossy(&plaintext)
        );

        let outcome = game.pick_lock(self.lock_target).await?;
        anyhow::ensure!(
            outcome.status == NegotiationStatus::Accepted,
            "trap stayed locked: {:?} after {} rounds",
            outcome.status,
            outcome.rounds
        );

        let spoils = game.loot(&self.treasure).await?;
        anyhow::ensure!(spoils == self.treasure, "spoils {spoils:?} differ from treasure");

        game.finish();
        Ok(())
    }
}
