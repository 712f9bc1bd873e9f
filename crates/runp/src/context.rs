use crate::platform_factory::PlatformShutdownFactory;
use runp_core::{
    EnvironmentSettings, GracefulShutdown, LiveSystem, Runpfile, SecretCipher, SystemProbe,
    Templater, VarsTemplater,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything bound into a unit before it becomes a process
#[derive(Clone)]
pub struct RunContext {
    pub vars: HashMap<String, String>,
    pub secret_key: String,
    pub settings: EnvironmentSettings,
    pub root: PathBuf,
    pub templater: Arc<dyn Templater>,
    pub cipher: Option<Arc<dyn SecretCipher>>,
    pub shutdown: Arc<dyn GracefulShutdown>,
    /// What preconditions are checked against
    pub system: Arc<dyn SystemProbe>,
}

impl RunContext {
    pub fn new(vars: HashMap<String, String>, secret_key: impl Into<String>, root: PathBuf) -> Self {
        Self {
            templater: Arc::new(VarsTemplater::new(vars.clone())),
            vars,
            secret_key: secret_key.into(),
            settings: EnvironmentSettings::default(),
            root,
            cipher: None,
            shutdown: PlatformShutdownFactory::create_shutdown(),
            system: Arc::new(LiveSystem::new(crate::VERSION)),
        }
    }

    pub fn from_runpfile(runpfile: &Runpfile) -> Self {
        Self::new(
            runpfile.vars.clone(),
            runpfile.secret_key.clone(),
            runpfile.root_dir(),
        )
    }

    pub fn with_settings(mut self, settings: EnvironmentSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_templater(mut self, templater: Arc<dyn Templater>) -> Self {
        self.templater = templater;
        self
    }

    pub fn with_cipher(mut self, cipher: Arc<dyn SecretCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn with_shutdown(mut self, shutdown: Arc<dyn GracefulShutdown>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_system(mut self, system: Arc<dyn SystemProbe>) -> Self {
        self.system = system;
        self
    }

    pub fn process(&self, input: &str) -> String {
        self.templater.process(input)
    }
}
