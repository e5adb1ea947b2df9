//! Scripted plugins for lifecycle tests: every lifecycle call appends
//! to a shared event log, and any call can be made to fail.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::bail;
use serde_json::{Map, Value};

use svc_conductor::{Dependencies, Export, Service, ServicePlugin};

pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn events(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[derive(Clone)]
pub struct ScriptedPlugin {
    name: &'static str,
    deps: Vec<String>,
    exports: Vec<String>,
    log: EventLog,
    needs_install: bool,
    fail_construct: bool,
    fail_install: bool,
    fail_start: bool,
    fail_stop: bool,
    fail_purge: bool,
    fail_job: bool,
}

impl ScriptedPlugin {
    pub fn new(name: &'static str, log: &EventLog) -> Self {
        Self {
            name,
            deps: Vec::new(),
            exports: Vec::new(),
            log: log.clone(),
            needs_install: false,
            fail_construct: false,
            fail_install: false,
            fail_start: false,
            fail_stop: false,
            fail_purge: false,
            fail_job: false,
        }
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.deps = deps.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn exporting(mut self, exports: &[&str]) -> Self {
        self.exports = exports.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn needs_install(mut self) -> Self {
        self.needs_install = true;
        self
    }

    pub fn failing_construct(mut self) -> Self {
        self.fail_construct = true;
        self
    }

    pub fn failing_install(mut self) -> Self {
        self.fail_install = true;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    pub fn failing_purge(mut self) -> Self {
        self.fail_purge = true;
        self
    }

    pub fn failing_job(mut self) -> Self {
        self.fail_job = true;
        self
    }
}

impl ServicePlugin for ScriptedPlugin {
    fn default_name(&self) -> Option<&str> {
        Some(self.name)
    }

    fn dependency_names(&self) -> Vec<String> {
        self.deps.clone()
    }

    fn export_names(&self) -> Vec<String> {
        self.exports.clone()
    }

    fn construct(
        &self,
        _config: &Map<String, Value>,
        deps: &Dependencies,
    ) -> anyhow::Result<Box<dyn Service>> {
        self.log.lock().unwrap().push(format!("construct {}", self.name));
        if self.fail_construct {
            bail!("scripted construct failure in {}", self.name);
        }
        // Record the concrete values we were wired with so tests can
        // assert on cross-stage plumbing.
        let mut wired = Vec::new();
        for declared in &self.deps {
            let value = deps.get::<String>(declared)?;
            wired.push(format!("{declared}={value}"));
        }
        if !wired.is_empty() {
            self.log
                .lock()
                .unwrap()
                .push(format!("wire {} [{}]", self.name, wired.join(", ")));
        }
        Ok(Box::new(ScriptedService {
            plugin: self.clone(),
            installed: !self.needs_install,
        }))
    }
}

pub struct ScriptedService {
    plugin: ScriptedPlugin,
    installed: bool,
}

impl ScriptedService {
    fn log(&self, event: &str) {
        self.plugin
            .log
            .lock()
            .unwrap()
            .push(format!("{event} {}", self.plugin.name));
    }
}

impl Service for ScriptedService {
    fn installed(&self) -> bool {
        self.installed
    }

    fn install(&mut self) -> anyhow::Result<()> {
        self.log("install");
        if self.plugin.fail_install {
            bail!("scripted install failure in {}", self.plugin.name);
        }
        self.installed = true;
        Ok(())
    }

    fn start(&mut self) -> anyhow::Result<()> {
        self.log("start");
        if self.plugin.fail_start {
            bail!("scripted start failure in {}", self.plugin.name);
        }
        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        self.log("stop");
        if self.plugin.fail_stop {
            bail!("scripted stop failure in {}", self.plugin.name);
        }
        Ok(())
    }

    fn purge(&mut self) -> anyhow::Result<()> {
        self.log("purge");
        if self.plugin.fail_purge {
            bail!("scripted purge failure in {}", self.plugin.name);
        }
        Ok(())
    }

    fn job(&mut self, args: &[String]) -> anyhow::Result<()> {
        self.plugin
            .log
            .lock()
            .unwrap()
            .push(format!("job {} [{}]", self.plugin.name, args.join(", ")));
        if self.plugin.fail_job {
            bail!("scripted job failure in {}", self.plugin.name);
        }
        Ok(())
    }

    fn exports(&self) -> HashMap<String, Export> {
        self.plugin
            .exports
            .iter()
            .map(|name| {
                let value = format!("{}:{name}", self.plugin.name);
                (name.clone(), Arc::new(value) as Export)
            })
            .collect()
    }
}
