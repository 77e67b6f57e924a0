//! Simulated network and mail server threads
//!
//! Neither thread touches the registry or scheduler. The network thread pushes
//! world events into the tick driver's work queue; the mail server answers
//! requests through the remote setter each one carries.

use std::io;
use std::rc::Rc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, info, trace};

use hearth_runner::{RemoteSetter, TickContext, WorkItem};
use hearth_scripting_host::points::{
    GroupId, GroupMemberRemoved, PlayerId, QuestId, QuestStatus, QuestStatusChanged,
    RemoveReason, SpellCastCheck, SpellEffectHit, SpellHit, SpellId,
};
use hearth_scripting_host::{ScopeKey, Verdict, WorkQueue};

use crate::scripts::MailDispatch;

pub const FIREBALL: SpellId = 133;
pub const FROSTBOLT: SpellId = 116;

const SPELLS: [SpellId; 2] = [FIREBALL, FROSTBOLT];
const PLAYERS: PlayerId = 8;
const BASE_DAMAGE: i32 = 100;

/// One reward item to deliver, answered on `reply`
pub struct MailRequest {
    pub player: PlayerId,
    pub item: String,
    pub reply: RemoteSetter<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorldEvent {
    Cast { caster: PlayerId, spell: SpellId },
    QuestCompleted { player: PlayerId, quest: QuestId },
    Kicked { group: GroupId, member: PlayerId },
}

impl WorldEvent {
    fn random(rng: &mut StdRng) -> Self {
        match rng.gen_range(0..10) {
            0..=6 => WorldEvent::Cast {
                caster: rng.gen_range(1..=PLAYERS),
                spell: SPELLS[rng.gen_range(0..SPELLS.len())],
            },
            7 | 8 => WorldEvent::QuestCompleted {
                player: rng.gen_range(1..=PLAYERS),
                quest: rng.gen_range(100..110),
            },
            _ => WorldEvent::Kicked {
                group: 1,
                member: rng.gen_range(1..=PLAYERS),
            },
        }
    }

    /// Apply the event on the tick thread
    fn apply(self, ctx: &mut TickContext<'_>) {
        match self {
            WorldEvent::Cast { caster, spell } => {
                let verdict = ctx
                    .registry
                    .check::<SpellCastCheck, _>(ScopeKey::Id(spell), |h| {
                        h.check_cast(caster, spell)
                    });
                if let Verdict::Veto { reason } = verdict {
                    info!(target: "sim",
                        "Player {} cannot cast spell {}: {}",
                        caster,
                        spell,
                        reason
                    );
                    return;
                }

                let hit = SpellHit {
                    spell_id: spell,
                    caster,
                    target: caster % PLAYERS + 1,
                    effect_index: 0,
                };
                let mut amount = BASE_DAMAGE;
                ctx.registry.notify::<SpellEffectHit, _>(ScopeKey::Id(spell), |h| {
                    h.on_effect_hit(&hit, &mut amount)
                });
                info!(target: "sim",
                    "Player {} hit player {} with spell {} for {}",
                    caster,
                    hit.target,
                    spell,
                    amount
                );
            }
            WorldEvent::QuestCompleted { player, quest } => {
                info!(target: "sim", "Player {} completed quest {}", player, quest);
                ctx.registry.notify::<QuestStatusChanged, _>(ScopeKey::Id(quest), |h| {
                    h.on_quest_status_change(
                        player,
                        quest,
                        QuestStatus::Incomplete,
                        QuestStatus::Complete,
                    )
                });

                let registry = Rc::clone(ctx.registry);
                registry.notify::<MailDispatch, _>(ScopeKey::Global, |h| h.dispatch_mail(ctx));
            }
            WorldEvent::Kicked { group, member } => {
                info!(target: "sim", "Player {} kicked from group {}", member, group);
                ctx.registry.notify::<GroupMemberRemoved, _>(ScopeKey::Global, |h| {
                    h.on_member_removed(group, member, RemoveReason::Kick)
                });
            }
        }
    }
}

/// Push a random world event every `period` until the queue shuts down
pub fn spawn_network(
    queue: Arc<WorkQueue<WorkItem>>,
    seed: u64,
    period: Duration,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("network".to_string())
        .spawn(move || {
            let mut rng = StdRng::seed_from_u64(seed);
            loop {
                thread::sleep(period);
                let event = WorldEvent::random(&mut rng);
                trace!(target: "sim", "Network received {:?}", event);

                if !queue.push(WorkItem::task(move |ctx| event.apply(ctx))) {
                    debug!(target: "sim", "Work queue closed, network thread exiting");
                    break;
                }
            }
        })
}

/// Answer mail requests after `latency` until every sender is dropped
pub fn spawn_mail_server(
    latency: Duration,
) -> io::Result<(UnboundedSender<MailRequest>, JoinHandle<()>)> {
    let (tx, mut rx) = mpsc::unbounded_channel::<MailRequest>();

    let handle = thread::Builder::new()
        .name("mail".to_string())
        .spawn(move || {
            while let Some(request) = rx.blocking_recv() {
                thread::sleep(latency);
                let receipt = format!("{} (player {})", request.item, request.player);
                if !request.reply.complete(receipt) {
                    debug!(target: "sim",
                        "Tick loop gone, dropping mail for player {}",
                        request.player
                    );
                }
            }
            debug!(target: "sim", "Mail server exiting");
        })?;

    Ok((tx, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripts::{CastGateScript, SpellEchoScript};
    use hearth_runner::{RunnerConfig, TickDriver};

    #[test]
    fn test_events_are_deterministic_per_seed() {
        let draw = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..20).map(|_| WorldEvent::random(&mut rng)).collect::<Vec<_>>()
        };
        assert_eq!(draw(7), draw(7));
    }

    #[test]
    fn test_kick_then_cast_is_vetoed() {
        let mut driver = TickDriver::new(&RunnerConfig::default());
        let gate = Rc::new(CastGateScript::default());
        let echo = Rc::new(SpellEchoScript::new(FIREBALL, 50));
        driver
            .registry()
            .register::<SpellCastCheck>(ScopeKey::Global, gate.clone())
            .unwrap();
        driver
            .registry()
            .register::<GroupMemberRemoved>(ScopeKey::Global, gate.clone())
            .unwrap();
        driver
            .registry()
            .register::<SpellEffectHit>(ScopeKey::Id(FIREBALL), echo.clone())
            .unwrap();

        let queue = driver.queue();
        for event in [
            WorldEvent::Cast { caster: 2, spell: FIREBALL },
            WorldEvent::Kicked { group: 1, member: 2 },
            WorldEvent::Cast { caster: 2, spell: FIREBALL },
            WorldEvent::Cast { caster: 3, spell: FROSTBOLT },
        ] {
            queue.push(WorkItem::task(move |ctx| event.apply(ctx)));
        }

        assert_eq!(driver.tick(Duration::from_millis(50)).work_items, 4);
        assert!(gate.is_silenced(2));
        assert_eq!(echo.echoes(), 1);
    }

    #[test]
    fn test_mail_server_answers_until_closed() {
        let mut driver = TickDriver::new(&RunnerConfig::default());
        let (mail, server) = spawn_mail_server(Duration::ZERO).unwrap();

        let (action, setter) = driver.scheduler_mut().create_result::<String>();
        let reply = driver.remote_setter(setter);
        let got = Rc::new(std::cell::RefCell::new(String::new()));
        let g = Rc::clone(&got);
        driver.scheduler_mut().then(action, "test", move |_, receipt| {
            *g.borrow_mut() = receipt;
            Ok(())
        });

        mail.send(MailRequest {
            player: 4,
            item: "boots".to_string(),
            reply,
        })
        .unwrap_or_else(|_| panic!("mail server stopped early"));
        drop(mail);
        server.join().unwrap();

        driver.tick(Duration::ZERO);
        assert_eq!(*got.borrow(), "boots (player 4)");
    }
}
