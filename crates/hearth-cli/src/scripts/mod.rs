//! Built-in demo scripts for the simulation

mod cast_gate;
mod quest_courier;
mod spell_echo;

use std::rc::Rc;
use std::time::Duration;

use hearth_runner::{ScriptsConfig, TickContext};
use hearth_scripting_host::points::{
    GroupMemberRemoved, QuestStatusChanged, SpellCastCheck, SpellEffectHit,
};
use hearth_scripting_host::{ExtensionPoint, HookKind, HookRegistry, ScopeKey, ScriptObject};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use crate::traffic::{MailRequest, FIREBALL};

pub use cast_gate::CastGateScript;
pub use quest_courier::QuestCourierScript;
pub use spell_echo::SpellEchoScript;

/// Scripts that send queued mail once per world event batch
pub trait MailScript: ScriptObject {
    fn dispatch_mail(&self, ctx: &mut TickContext<'_>) -> anyhow::Result<()>;
}

/// Time to hand outgoing mail to the mail server. Always global.
pub struct MailDispatch;

impl ExtensionPoint for MailDispatch {
    type Handler = dyn MailScript;
    const NAME: &'static str = "mail.dispatch";
    const KIND: HookKind = HookKind::FireAndForget;
}

/// Handles to the loaded scripts, kept for the end-of-run summary
///
/// Holding these keeps the scripts (and the courier's mail sender) alive; drop it
/// before waiting on the mail server.
#[derive(Default)]
pub struct LoadedScripts {
    pub count: usize,
    echo: Option<Rc<SpellEchoScript>>,
    gate: Option<Rc<CastGateScript>>,
    courier: Option<Rc<QuestCourierScript>>,
}

impl LoadedScripts {
    pub fn log_summary(&self) {
        if let Some(echo) = &self.echo {
            info!(target: "scripts", "spell_echo echoed {} hit(s)", echo.echoes());
        }
        if let Some(gate) = &self.gate {
            info!(target: "scripts", "cast_gate silenced {} player(s)", gate.silenced_count());
        }
        if let Some(courier) = &self.courier {
            info!(target: "scripts", "quest_courier delivered {} parcel(s)", courier.delivered());
        }
    }
}

/// Register every script named in `config.enabled`
///
/// Unknown names are skipped with a warning.
pub fn load_scripts(
    registry: &HookRegistry,
    config: &ScriptsConfig,
    mail: UnboundedSender<MailRequest>,
) -> anyhow::Result<LoadedScripts> {
    let mut loaded = LoadedScripts::default();

    for name in &config.enabled {
        match name.as_str() {
            "spell_echo" => {
                let echo = Rc::new(SpellEchoScript::new(FIREBALL, 25));
                registry.register::<SpellEffectHit>(ScopeKey::Id(FIREBALL), echo.clone())?;
                loaded.echo = Some(echo);
            }
            "cast_gate" => {
                let gate = Rc::new(CastGateScript::default());
                registry.register::<SpellCastCheck>(ScopeKey::Global, gate.clone())?;
                registry.register::<GroupMemberRemoved>(ScopeKey::Global, gate.clone())?;
                loaded.gate = Some(gate);
            }
            "quest_courier" => {
                let courier =
                    Rc::new(QuestCourierScript::new(mail.clone(), Duration::from_secs(1)));
                registry.register::<QuestStatusChanged>(ScopeKey::Global, courier.clone())?;
                registry.register::<MailDispatch>(ScopeKey::Global, courier.clone())?;
                loaded.courier = Some(courier);
            }
            other => {
                warn!(target: "scripts", "Unknown script '{}' in config, skipping", other);
                continue;
            }
        }

        info!(target: "scripts", "Loaded script {}", name);
        loaded.count += 1;
    }

    Ok(loaded)
}
