use std::cell::RefCell;
use std::collections::HashSet;
use tracing::info;

use hearth_scripting_host::points::{
    GroupId, GroupScript, PlayerId, RemoveReason, SpellCastScript, SpellId,
};
use hearth_scripting_host::{ScriptObject, Verdict};

/// Silences players kicked from a group; silenced players cannot cast
#[derive(Default)]
pub struct CastGateScript {
    silenced: RefCell<HashSet<PlayerId>>,
}

impl CastGateScript {
    pub fn is_silenced(&self, player: PlayerId) -> bool {
        self.silenced.borrow().contains(&player)
    }

    pub fn silenced_count(&self) -> usize {
        self.silenced.borrow().len()
    }
}

impl ScriptObject for CastGateScript {
    fn script_name(&self) -> &str {
        "cast_gate"
    }
}

impl SpellCastScript for CastGateScript {
    fn check_cast(&self, caster: PlayerId, _spell: SpellId) -> Verdict {
        if self.is_silenced(caster) {
            Verdict::veto(format!("player {} is silenced", caster))
        } else {
            Verdict::Allow
        }
    }
}

impl GroupScript for CastGateScript {
    fn on_member_removed(
        &self,
        group: GroupId,
        member: PlayerId,
        reason: RemoveReason,
    ) -> anyhow::Result<()> {
        if reason == RemoveReason::Kick && self.silenced.borrow_mut().insert(member) {
            info!(target: "scripts", "Player {} kicked from group {}, silenced", member, group);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_scripting_host::points::{GroupMemberRemoved, SpellCastCheck};
    use hearth_scripting_host::{HookRegistry, ScopeKey};
    use std::rc::Rc;

    #[test]
    fn test_kicked_player_cannot_cast() {
        let registry = HookRegistry::new();
        let gate = Rc::new(CastGateScript::default());
        registry
            .register::<SpellCastCheck>(ScopeKey::Global, gate.clone())
            .unwrap();
        registry
            .register::<GroupMemberRemoved>(ScopeKey::Global, gate.clone())
            .unwrap();

        let check = |caster| {
            registry.check::<SpellCastCheck, _>(ScopeKey::Id(133), |h| h.check_cast(caster, 133))
        };
        assert!(check(4).is_allow());

        registry.notify::<GroupMemberRemoved, _>(ScopeKey::Global, |h| {
            h.on_member_removed(1, 4, RemoveReason::Leave)
        });
        assert!(check(4).is_allow());

        registry.notify::<GroupMemberRemoved, _>(ScopeKey::Global, |h| {
            h.on_member_removed(1, 4, RemoveReason::Kick)
        });
        assert_eq!(check(4), Verdict::veto("player 4 is silenced"));
        assert!(check(5).is_allow());
        assert!(gate.is_silenced(4));
        assert_eq!(gate.silenced_count(), 1);
    }
}
