// StubAccess: fully scripted Access implementation for tests and dry
// runs. Every call is appended to a journal so tests can assert on the
// exact device traffic an exec produced.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{
    Access, AccessError, CommandResult, Dut, PowerAction, PowerStatus, ServodResponse, ServodValue,
};

/// Scripted Access double. Defaults to success everywhere.
#[derive(Default)]
pub struct StubAccess {
    failing_pings: HashSet<String>,
    /// Commands containing any of these substrings fail.
    failing_commands: Vec<String>,
    servod_responses: HashMap<String, ServodResponse>,
    duts: Mutex<HashMap<String, Dut>>,
    journal: Mutex<Vec<String>>,
}

impl StubAccess {
    /// A stub where every capability succeeds.
    pub fn ok() -> Self {
        Self::default()
    }

    /// Makes pings against the given resource fail.
    pub fn fail_ping(mut self, resource: &str) -> Self {
        self.failing_pings.insert(resource.to_string());
        self
    }

    /// Makes any command containing the substring fail with exit 1.
    pub fn fail_command(mut self, fragment: &str) -> Self {
        self.failing_commands.push(fragment.to_string());
        self
    }

    /// Scripts the response of a servod method.
    pub fn servod_response(mut self, method: &str, response: ServodResponse) -> Self {
        self.servod_responses.insert(method.to_string(), response);
        self
    }

    /// Seeds the inventory with a record.
    pub fn with_dut(self, dut: Dut) -> Self {
        self.duts.lock().unwrap().insert(dut.name.clone(), dut);
        self
    }

    /// Snapshot of every call made so far.
    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    fn record(&self, entry: String) {
        self.journal.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl Access for StubAccess {
    async fn ping(&self, resource: &str, attempts: u32) -> Result<(), AccessError> {
        self.record(format!("ping:{}", resource));
        if self.failing_pings.contains(resource) {
            Err(AccessError::Ping {
                resource: resource.to_string(),
                attempts,
            })
        } else {
            Ok(())
        }
    }

    async fn run(
        &self,
        resource: &str,
        command: &str,
        _timeout: Duration,
    ) -> Result<CommandResult, AccessError> {
        self.record(format!("run:{}", command));
        let fails = self
            .failing_commands
            .iter()
            .any(|fragment| command.contains(fragment));
        Ok(CommandResult {
            exit_code: if fails { 1 } else { 0 },
            stdout: String::new(),
            stderr: if fails { "scripted failure".to_string() } else { String::new() },
        })
    }

    async fn call_servod(
        &self,
        resource: &str,
        method: &str,
        _args: &[String],
        _timeout: Duration,
    ) -> Result<ServodResponse, AccessError> {
        self.record(format!("servod:{}:{}", resource, method));
        Ok(self
            .servod_responses
            .get(method)
            .cloned()
            .unwrap_or(ServodResponse {
                value: ServodValue::String("ok".to_string()),
                fault: false,
            }))
    }

    async fn copy_to(
        &self,
        resource: &str,
        src: &str,
        dst: &str,
        _recursive: bool,
    ) -> Result<(), AccessError> {
        self.record(format!("copy_to:{}:{}:{}", resource, src, dst));
        Ok(())
    }

    async fn copy_from(
        &self,
        resource: &str,
        src: &str,
        dst: &str,
        _recursive: bool,
    ) -> Result<(), AccessError> {
        self.record(format!("copy_from:{}:{}:{}", resource, src, dst));
        Ok(())
    }

    async fn set_power_supply(
        &self,
        resource: &str,
        action: PowerAction,
    ) -> Result<PowerStatus, AccessError> {
        self.record(format!("power:{}:{}", resource, action));
        Ok(PowerStatus::ok())
    }

    async fn list_resources_for_unit(&self, unit: &str) -> Result<Vec<String>, AccessError> {
        self.record(format!("list:{}", unit));
        let duts = self.duts.lock().unwrap();
        let mut names: Vec<String> = duts.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn get_dut(&self, resource: &str) -> Result<Dut, AccessError> {
        self.record(format!("get_dut:{}", resource));
        let duts = self.duts.lock().unwrap();
        Ok(duts.get(resource).cloned().unwrap_or_else(|| Dut {
            name: resource.to_string(),
            ..Dut::default()
        }))
    }

    async fn update_dut(&self, dut: &Dut) -> Result<(), AccessError> {
        self.record(format!("update_dut:{}:{}", dut.name, dut.state));
        self.duts
            .lock()
            .unwrap()
            .insert(dut.name.clone(), dut.clone());
        Ok(())
    }
}
