//! Built-in extension points of the game server.
//!
//! Each point pairs a marker type with the narrow capability trait its handlers
//! implement. Content crates can define further points the same way.

use crate::point::{ExtensionPoint, HookKind, Verdict};
use crate::ScriptObject;

pub type PlayerId = u64;
pub type SpellId = u32;
pub type QuestId = u32;
pub type GroupId = u64;

/// Quest progress as seen by scripts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestStatus {
    None,
    Incomplete,
    Complete,
    Failed,
    Rewarded,
}

/// Why a member left a group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveReason {
    Leave,
    Kick,
    Disband,
    Offline,
}

/// A spell effect landing on a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpellHit {
    pub spell_id: SpellId,
    pub caster: PlayerId,
    pub target: PlayerId,
    pub effect_index: u8,
}

// ── Quests ───────────────────────────────────────────────────

pub trait QuestScript: ScriptObject {
    fn on_quest_status_change(
        &self,
        player: PlayerId,
        quest: QuestId,
        old_status: QuestStatus,
        new_status: QuestStatus,
    ) -> anyhow::Result<()>;
}

/// A player's quest status changed. Scoped by quest ID.
pub struct QuestStatusChanged;

impl ExtensionPoint for QuestStatusChanged {
    type Handler = dyn QuestScript;
    const NAME: &'static str = "quest.status_change";
    const KIND: HookKind = HookKind::FireAndForget;
}

// ── Spells ───────────────────────────────────────────────────

pub trait SpellEffectScript: ScriptObject {
    /// Adjust the effect amount. Handlers accumulate into `amount` in order.
    fn on_effect_hit(&self, hit: &SpellHit, amount: &mut i32) -> anyhow::Result<()>;
}

/// A spell effect hit its target. Scoped by spell ID.
pub struct SpellEffectHit;

impl ExtensionPoint for SpellEffectHit {
    type Handler = dyn SpellEffectScript;
    const NAME: &'static str = "spell.effect_hit";
    const KIND: HookKind = HookKind::FireAndForget;
}

pub trait SpellCastScript: ScriptObject {
    fn check_cast(&self, caster: PlayerId, spell: SpellId) -> Verdict;
}

/// Whether a cast may proceed. Scoped by spell ID; the first veto wins.
pub struct SpellCastCheck;

impl ExtensionPoint for SpellCastCheck {
    type Handler = dyn SpellCastScript;
    const NAME: &'static str = "spell.cast_check";
    const KIND: HookKind = HookKind::Filter;
}

// ── Groups ───────────────────────────────────────────────────

pub trait GroupScript: ScriptObject {
    fn on_member_removed(
        &self,
        group: GroupId,
        member: PlayerId,
        reason: RemoveReason,
    ) -> anyhow::Result<()>;
}

/// A member left a group. Usually registered globally.
pub struct GroupMemberRemoved;

impl ExtensionPoint for GroupMemberRemoved {
    type Handler = dyn GroupScript;
    const NAME: &'static str = "group.member_removed";
    const KIND: HookKind = HookKind::FireAndForget;
}
