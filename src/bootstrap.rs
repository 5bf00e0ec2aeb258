//! Bootstrap policy and the step runner
//!
//! [`BootstrapPolicy`] is a set of switches, one per startup step, all on by
//! default. [`Bootstrapper`] walks the steps in their fixed order and runs
//! the enabled ones. Steps this crate owns (storage, options, plugin
//! registration, install/upgrade checks, events) are executed here; the rest
//! are handed to an external step hook supplied by the caller.

use std::fs;
use std::path::{Component, Path};

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::database::{self, Tables};
use crate::driver::Driver;
use crate::error::{Termination, UserDirErrorPage};
use crate::storage::StorageHandle;

/// One startup step, in the order the bootstrapper runs them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    IncludeCoreFuncs,
    DefaultTimezone,
    LoadDefaultTextdomain,
    CheckMaintenanceMode,
    FixRequestUri,
    RedirectSsl,
    IncludeDb,
    IncludeCache,
    ReturnIfFastInit,
    GetAllOptions,
    RegisterShutdown,
    CoreLoaded,
    RedirectToInstall,
    CheckIfUpgradeNeeded,
    LoadPlugins,
    PluginsLoadedAction,
    CheckNewVersion,
    InitAdmin,
}

impl Step {
    pub const ALL: [Step; 18] = [
        Step::IncludeCoreFuncs,
        Step::DefaultTimezone,
        Step::LoadDefaultTextdomain,
        Step::CheckMaintenanceMode,
        Step::FixRequestUri,
        Step::RedirectSsl,
        Step::IncludeDb,
        Step::IncludeCache,
        Step::ReturnIfFastInit,
        Step::GetAllOptions,
        Step::RegisterShutdown,
        Step::CoreLoaded,
        Step::RedirectToInstall,
        Step::CheckIfUpgradeNeeded,
        Step::LoadPlugins,
        Step::PluginsLoadedAction,
        Step::CheckNewVersion,
        Step::InitAdmin,
    ];
}

/// Which bootstrap steps run. Every switch defaults to `true`.
///
/// Test harnesses typically start from the default and turn off what they
/// cannot provide:
///
/// ```
/// # use shortener::bootstrap::{BootstrapPolicy, Step};
/// let policy = BootstrapPolicy::default()
///     .set(Step::CheckNewVersion, false)
///     .set(Step::RedirectSsl, false);
/// assert!(policy.include_db);
/// assert!(!policy.check_new_version);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BootstrapPolicy {
    pub include_core_funcs: bool,
    pub default_timezone: bool,
    pub load_default_textdomain: bool,
    pub check_maintenance_mode: bool,
    pub fix_request_uri: bool,
    pub redirect_ssl: bool,
    pub include_db: bool,
    pub include_cache: bool,
    pub return_if_fast_init: bool,
    pub get_all_options: bool,
    pub register_shutdown: bool,
    pub core_loaded: bool,
    pub redirect_to_install: bool,
    pub check_if_upgrade_needed: bool,
    pub load_plugins: bool,
    pub plugins_loaded_action: bool,
    pub check_new_version: bool,
    pub init_admin: bool,
}

impl Default for BootstrapPolicy {
    fn default() -> Self {
        Self {
            include_core_funcs: true,
            default_timezone: true,
            load_default_textdomain: true,
            check_maintenance_mode: true,
            fix_request_uri: true,
            redirect_ssl: true,
            include_db: true,
            include_cache: true,
            return_if_fast_init: true,
            get_all_options: true,
            register_shutdown: true,
            core_loaded: true,
            redirect_to_install: true,
            check_if_upgrade_needed: true,
            load_plugins: true,
            plugins_loaded_action: true,
            check_new_version: true,
            init_admin: true,
        }
    }
}

impl BootstrapPolicy {
    /// Policy with every step switched off
    pub fn none() -> Self {
        let mut policy = Self::default();
        for step in Step::ALL {
            *policy.flag_mut(step) = false;
        }
        policy
    }

    pub fn enabled(&self, step: Step) -> bool {
        match step {
            Step::IncludeCoreFuncs => self.include_core_funcs,
            Step::DefaultTimezone => self.default_timezone,
            Step::LoadDefaultTextdomain => self.load_default_textdomain,
            Step::CheckMaintenanceMode => self.check_maintenance_mode,
            Step::FixRequestUri => self.fix_request_uri,
            Step::RedirectSsl => self.redirect_ssl,
            Step::IncludeDb => self.include_db,
            Step::IncludeCache => self.include_cache,
            Step::ReturnIfFastInit => self.return_if_fast_init,
            Step::GetAllOptions => self.get_all_options,
            Step::RegisterShutdown => self.register_shutdown,
            Step::CoreLoaded => self.core_loaded,
            Step::RedirectToInstall => self.redirect_to_install,
            Step::CheckIfUpgradeNeeded => self.check_if_upgrade_needed,
            Step::LoadPlugins => self.load_plugins,
            Step::PluginsLoadedAction => self.plugins_loaded_action,
            Step::CheckNewVersion => self.check_new_version,
            Step::InitAdmin => self.init_admin,
        }
    }

    pub fn set(mut self, step: Step, enabled: bool) -> Self {
        *self.flag_mut(step) = enabled;
        self
    }

    /// Enabled steps in bootstrap order
    pub fn enabled_steps(&self) -> Vec<Step> {
        Step::ALL
            .into_iter()
            .filter(|step| self.enabled(*step))
            .collect()
    }

    fn flag_mut(&mut self, step: Step) -> &mut bool {
        match step {
            Step::IncludeCoreFuncs => &mut self.include_core_funcs,
            Step::DefaultTimezone => &mut self.default_timezone,
            Step::LoadDefaultTextdomain => &mut self.load_default_textdomain,
            Step::CheckMaintenanceMode => &mut self.check_maintenance_mode,
            Step::FixRequestUri => &mut self.fix_request_uri,
            Step::RedirectSsl => &mut self.redirect_ssl,
            Step::IncludeDb => &mut self.include_db,
            Step::IncludeCache => &mut self.include_cache,
            Step::ReturnIfFastInit => &mut self.return_if_fast_init,
            Step::GetAllOptions => &mut self.get_all_options,
            Step::RegisterShutdown => &mut self.register_shutdown,
            Step::CoreLoaded => &mut self.core_loaded,
            Step::RedirectToInstall => &mut self.redirect_to_install,
            Step::CheckIfUpgradeNeeded => &mut self.check_if_upgrade_needed,
            Step::LoadPlugins => &mut self.load_plugins,
            Step::PluginsLoadedAction => &mut self.plugins_loaded_action,
            Step::CheckNewVersion => &mut self.check_new_version,
            Step::InitAdmin => &mut self.init_admin,
        }
    }
}

/// Events fired to listeners during bootstrap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    CoreLoaded,
    PluginsLoaded,
    AdminInit,
}

/// Where bootstrap stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every enabled step ran
    Ready,
    /// The maintenance file is present
    Maintenance,
    /// Fast init requested, stopped after the database came up
    FastInit,
    /// Not installed, the caller should send the client to the installer
    RedirectToInstaller,
    /// Schema is outdated, the caller should send the client to the upgrader
    RedirectToUpgrader,
}

/// Result of a bootstrap run that did not terminate
pub struct Bootstrapped<D: Driver> {
    /// Present once the `IncludeDb` step has run
    pub storage: Option<StorageHandle<D>>,
    pub outcome: Outcome,
    /// Steps that ran, in order
    pub executed: Vec<Step>,
}

/// Option holding the list of active plugin files
pub const ACTIVE_PLUGINS_OPTION: &str = "active_plugins";

type Listener<D> = Box<dyn FnMut(Event, &mut StorageHandle<D>)>;
type StepHook = Box<dyn FnMut(Step)>;

pub struct Bootstrapper<D: Driver> {
    config: Config,
    listeners: Vec<Listener<D>>,
    step_hook: Option<StepHook>,
}

impl<D: Driver> Bootstrapper<D> {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            listeners: Vec::new(),
            step_hook: None,
        }
    }

    /// Registers a listener for bootstrap events
    pub fn on_event(mut self, listener: impl FnMut(Event, &mut StorageHandle<D>) + 'static) -> Self {
        self.listeners.push(Box::new(listener));
        self
    }

    /// Registers the hook that performs steps owned by other components
    /// (timezone, translations, request URI, cache layer, ...)
    pub fn on_external_step(mut self, hook: impl FnMut(Step) + 'static) -> Self {
        self.step_hook = Some(Box::new(hook));
        self
    }

    /// Runs every enabled step in order.
    ///
    /// A database connection failure ends the run with the termination the
    /// caller must respond with; nothing after `IncludeDb` runs in that case.
    pub fn run(mut self, driver: D) -> Result<Bootstrapped<D>, Termination> {
        let tables = Tables::with_prefix(&self.config.db_prefix);
        let mut driver = Some(driver);
        let mut storage: Option<StorageHandle<D>> = None;
        let mut executed = Vec::new();

        for step in self.config.policy.enabled_steps() {
            debug!(?step, "bootstrap step");
            executed.push(step);

            let stop = match step {
                Step::CheckMaintenanceMode => self
                    .config
                    .maintenance_file()
                    .is_file()
                    .then_some(Outcome::Maintenance),
                Step::IncludeDb => {
                    if let Some(driver) = driver.take() {
                        let mut db = StorageHandle::new(driver, self.config.credentials())
                            .with_error_page(UserDirErrorPage::new(&self.config.userdir));
                        db.init()?;
                        storage = Some(db);
                    }
                    None
                }
                Step::ReturnIfFastInit => self.config.fast_init.then_some(Outcome::FastInit),
                Step::GetAllOptions => {
                    if let Some(db) = storage_for(&mut storage, step) {
                        database::preload_options(db, &tables);
                    }
                    None
                }
                Step::CoreLoaded => {
                    fire(&mut self.listeners, Event::CoreLoaded, &mut storage);
                    None
                }
                Step::RedirectToInstall => storage
                    .as_ref()
                    .filter(|db| !db.is_installed())
                    .map(|_| Outcome::RedirectToInstaller),
                Step::CheckIfUpgradeNeeded => storage
                    .as_ref()
                    .filter(|db| db.is_installed() && database::upgrade_needed(db))
                    .map(|_| Outcome::RedirectToUpgrader),
                Step::LoadPlugins => {
                    if let Some(db) = storage_for(&mut storage, step) {
                        load_plugins(db, &self.config.plugin_dir());
                    }
                    None
                }
                Step::PluginsLoadedAction => {
                    fire(&mut self.listeners, Event::PluginsLoaded, &mut storage);
                    None
                }
                Step::InitAdmin => {
                    fire(&mut self.listeners, Event::AdminInit, &mut storage);
                    None
                }
                external => {
                    if let Some(hook) = self.step_hook.as_mut() {
                        hook(external);
                    }
                    None
                }
            };

            if let Some(outcome) = stop {
                info!(?outcome, "bootstrap stopped early");
                return Ok(Bootstrapped {
                    storage,
                    outcome,
                    executed,
                });
            }
        }

        info!(steps = executed.len(), "bootstrap complete");
        Ok(Bootstrapped {
            storage,
            outcome: Outcome::Ready,
            executed,
        })
    }
}

fn storage_for<D: Driver>(
    storage: &mut Option<StorageHandle<D>>,
    step: Step,
) -> Option<&mut StorageHandle<D>> {
    if storage.is_none() {
        warn!(?step, "step needs storage but the database step is disabled");
    }
    storage.as_mut()
}

fn fire<D: Driver>(
    listeners: &mut [Listener<D>],
    event: Event,
    storage: &mut Option<StorageHandle<D>>,
) {
    let Some(db) = storage.as_mut() else {
        debug!(?event, "no storage, event not delivered");
        return;
    };
    debug!(?event, listeners = listeners.len(), "firing event");
    for listener in listeners.iter_mut() {
        listener(event, &mut *db);
    }
}

/// Registers every active plugin whose file exists under `plugin_dir`.
/// Returns how many were registered.
pub fn load_plugins<D: Driver>(db: &mut StorageHandle<D>, plugin_dir: &Path) -> usize {
    let active: Vec<String> = match db.get_option(ACTIVE_PLUGINS_OPTION) {
        Ok(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Ok(Value::String(raw)) => serde_json::from_str(raw).unwrap_or_default(),
        _ => Vec::new(),
    };

    let mut loaded = 0;
    for plugin in active {
        if !is_relative_inside(Path::new(&plugin)) {
            warn!(plugin = %plugin, "active plugin path leaves the plugin directory, skipped");
            continue;
        }
        let path = plugin_dir.join(&plugin);
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => {
                db.add_plugin(plugin);
                loaded += 1;
            }
            _ => warn!(plugin = %plugin, path = %path.display(), "active plugin file missing, skipped"),
        }
    }

    info!(loaded, "plugins registered");
    loaded
}

/// Only plain relative paths stay inside the directory they are joined to
fn is_relative_inside(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_flag_defaults_on() {
        let policy = BootstrapPolicy::default();
        assert_eq!(policy.enabled_steps(), Step::ALL.to_vec());
        for step in Step::ALL {
            assert!(policy.enabled(step), "{step:?} should default to on");
        }
    }

    #[test]
    fn test_selective_override() {
        let policy = BootstrapPolicy {
            redirect_ssl: false,
            check_new_version: false,
            ..Default::default()
        };
        assert!(!policy.enabled(Step::RedirectSsl));
        assert!(!policy.enabled(Step::CheckNewVersion));
        assert_eq!(policy.enabled_steps().len(), Step::ALL.len() - 2);
    }

    #[test]
    fn test_none_then_enable_keeps_order() {
        let policy = BootstrapPolicy::none()
            .set(Step::LoadPlugins, true)
            .set(Step::IncludeDb, true);
        assert_eq!(policy.enabled_steps(), vec![Step::IncludeDb, Step::LoadPlugins]);
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let policy: BootstrapPolicy = serde_json::from_str(r#"{"include_cache": false}"#).unwrap();
        assert!(!policy.include_cache);
        assert!(policy.include_db);
        assert!(policy.init_admin);
    }
}
