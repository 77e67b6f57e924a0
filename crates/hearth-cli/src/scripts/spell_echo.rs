use std::cell::Cell;
use tracing::debug;

use hearth_scripting_host::points::{SpellEffectScript, SpellHit, SpellId};
use hearth_scripting_host::ScriptObject;

/// Echoes a share of every hit of one spell back as bonus damage
pub struct SpellEchoScript {
    spell: SpellId,
    /// Bonus as a percentage of the incoming amount
    percent: i32,
    echoes: Cell<u32>,
}

impl SpellEchoScript {
    pub fn new(spell: SpellId, percent: i32) -> Self {
        Self {
            spell,
            percent,
            echoes: Cell::new(0),
        }
    }

    pub fn echoes(&self) -> u32 {
        self.echoes.get()
    }
}

impl ScriptObject for SpellEchoScript {
    fn script_name(&self) -> &str {
        "spell_echo"
    }

    fn validate(&self) -> anyhow::Result<()> {
        if !(1..=100).contains(&self.percent) {
            anyhow::bail!("echo percent {} is outside 1..=100", self.percent);
        }
        Ok(())
    }
}

impl SpellEffectScript for SpellEchoScript {
    fn on_effect_hit(&self, hit: &SpellHit, amount: &mut i32) -> anyhow::Result<()> {
        if hit.spell_id != self.spell {
            anyhow::bail!("registered for spell {} but got spell {}", self.spell, hit.spell_id);
        }

        let bonus = *amount * self.percent / 100;
        *amount += bonus;
        self.echoes.set(self.echoes.get() + 1);

        debug!(target: "scripts",
            "Spell {} echoed for {} extra on player {}",
            hit.spell_id,
            bonus,
            hit.target
        );
        Ok(())
    }
}
