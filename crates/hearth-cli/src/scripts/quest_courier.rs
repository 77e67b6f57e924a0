use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

use hearth_runner::TickContext;
use hearth_scripting_host::points::{PlayerId, QuestId, QuestScript, QuestStatus};
use hearth_scripting_host::ScriptObject;

use super::MailScript;
use crate::traffic::MailRequest;

/// Mails quest rewards a short while after a quest is completed
///
/// Each completed quest becomes one parcel: a multi result with one child per
/// reward item. The mail server completes the children from its own thread and
/// the parcel is logged as delivered once every item has come back.
pub struct QuestCourierScript {
    mail: UnboundedSender<MailRequest>,
    delay: Duration,
    pending: RefCell<Vec<(PlayerId, QuestId)>>,
    delivered: Rc<Cell<u32>>,
}

impl QuestCourierScript {
    pub fn new(mail: UnboundedSender<MailRequest>, delay: Duration) -> Self {
        Self {
            mail,
            delay,
            pending: RefCell::new(Vec::new()),
            delivered: Rc::new(Cell::new(0)),
        }
    }

    /// Parcels fully delivered so far
    pub fn delivered(&self) -> u32 {
        self.delivered.get()
    }
}

fn reward_items(quest: QuestId) -> Vec<String> {
    let coins = u64::from(quest) * 10;
    vec![format!("{} coins", coins), format!("token of quest {}", quest)]
}

impl ScriptObject for QuestCourierScript {
    fn script_name(&self) -> &str {
        "quest_courier"
    }
}

impl QuestScript for QuestCourierScript {
    fn on_quest_status_change(
        &self,
        player: PlayerId,
        quest: QuestId,
        _old_status: QuestStatus,
        new_status: QuestStatus,
    ) -> anyhow::Result<()> {
        if new_status == QuestStatus::Complete {
            self.pending.borrow_mut().push((player, quest));
        }
        Ok(())
    }
}

impl MailScript for QuestCourierScript {
    fn dispatch_mail(&self, ctx: &mut TickContext<'_>) -> anyhow::Result<()> {
        let pending = self.pending.take();

        for (player, quest) in pending {
            let parcel = ctx.scheduler.create_multi_result::<String>();
            let mut requests = Vec::new();
            for item in reward_items(quest) {
                let reply = ctx.remote_setter(parcel.create_and_get_result());
                requests.push(MailRequest {
                    player,
                    item,
                    reply,
                });
            }

            let wait = ctx.scheduler.create_wait(self.delay);
            let mail = self.mail.clone();
            ctx.scheduler.then(wait, "quest_courier", move |_, ()| {
                for request in requests {
                    mail.send(request)
                        .map_err(|_| anyhow::anyhow!("mail server is down"))?;
                }
                Ok(())
            });

            let delivered = Rc::clone(&self.delivered);
            ctx.scheduler.then(parcel.action(), "quest_courier", move |_, items| {
                delivered.set(delivered.get() + 1);
                info!(target: "scripts",
                    "Delivered quest {} rewards to player {}: {}",
                    quest,
                    player,
                    items.join(", ")
                );
                Ok(())
            });

            debug!(target: "scripts", "Parcel {} for player {} queued", parcel.id(), player);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripts::MailDispatch;
    use hearth_runner::{RunnerConfig, TickDriver, WorkItem};
    use hearth_scripting_host::points::QuestStatusChanged;
    use hearth_scripting_host::ScopeKey;

    #[test]
    fn test_completed_quest_is_mailed_and_delivered() {
        let mut driver = TickDriver::new(&RunnerConfig::default());
        let (mail, mut inbox) = tokio::sync::mpsc::unbounded_channel();
        let courier = Rc::new(QuestCourierScript::new(mail, Duration::from_secs(1)));
        driver
            .registry()
            .register::<QuestStatusChanged>(ScopeKey::Global, courier.clone())
            .unwrap();
        driver
            .registry()
            .register::<MailDispatch>(ScopeKey::Global, courier.clone())
            .unwrap();

        driver.queue().push(WorkItem::task(|ctx| {
            ctx.registry.notify::<QuestStatusChanged, _>(ScopeKey::Id(12), |h| {
                h.on_quest_status_change(3, 12, QuestStatus::Incomplete, QuestStatus::Complete)
            });
            let registry = Rc::clone(ctx.registry);
            registry.notify::<MailDispatch, _>(ScopeKey::Global, |h| h.dispatch_mail(ctx));
        }));

        // Parcel queued, nothing mailed before the delay
        driver.tick(Duration::from_millis(500));
        assert!(inbox.try_recv().is_err());

        driver.tick(Duration::from_millis(500));
        let first = inbox.try_recv().unwrap();
        let second = inbox.try_recv().unwrap();
        assert_eq!(first.item, "120 coins");
        assert_eq!(second.player, 3);

        assert!(first.reply.complete("ok".to_string()));
        driver.tick(Duration::ZERO);
        assert_eq!(courier.delivered(), 0);

        assert!(second.reply.complete("ok".to_string()));
        driver.tick(Duration::ZERO);
        assert_eq!(courier.delivered(), 1);
        assert!(driver.scheduler().is_idle());
    }

    #[test]
    fn test_reward_items_for_largest_quest_id() {
        let items = reward_items(QuestId::MAX);
        assert_eq!(items[0], "42949672950 coins");
        assert_eq!(items[1], format!("token of quest {}", QuestId::MAX));
    }

    #[test]
    fn test_refused_mail_releases_remote_setters() {
        let mut driver = TickDriver::new(&RunnerConfig::default());
        let (mail, inbox) = tokio::sync::mpsc::unbounded_channel();
        drop(inbox);
        let courier = Rc::new(QuestCourierScript::new(mail, Duration::ZERO));
        driver
            .registry()
            .register::<MailDispatch>(ScopeKey::Global, courier.clone())
            .unwrap();
        courier
            .on_quest_status_change(2, 7, QuestStatus::Incomplete, QuestStatus::Complete)
            .unwrap();

        driver.queue().push(WorkItem::task(|ctx| {
            let registry = Rc::clone(ctx.registry);
            registry.notify::<MailDispatch, _>(ScopeKey::Global, |h| h.dispatch_mail(ctx));
        }));
        // The zero wait fires in the same tick; sending fails and drops the requests
        let report = driver.tick(Duration::ZERO);
        assert_eq!(report.poll.faulted, 1);
        assert_eq!(driver.outstanding_completions(), 2);

        let report = driver.tick(Duration::ZERO);
        assert_eq!(report.work_items, 2);
        assert_eq!(driver.outstanding_completions(), 0);
        assert_eq!(courier.delivered(), 0);
    }

    #[test]
    fn test_other_status_changes_are_ignored() {
        let (mail, _inbox) = tokio::sync::mpsc::unbounded_channel();
        let courier = QuestCourierScript::new(mail, Duration::ZERO);

        courier
            .on_quest_status_change(1, 5, QuestStatus::None, QuestStatus::Incomplete)
            .unwrap();
        courier
            .on_quest_status_change(1, 5, QuestStatus::Complete, QuestStatus::Rewarded)
            .unwrap();

        assert!(courier.pending.borrow().is_empty());
    }
}
