//! In-memory directory used by the source tests.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::source::ldap::{Config, Connector, Directory, Entry, Scope};
use crate::source::Error;

#[derive(Default)]
struct State {
    passwords: HashMap<String, String>,
    searches: HashMap<(String, String), Vec<Entry>>,
    binds: Vec<String>,
    open_connections: usize,
    unavailable: bool,
}

#[derive(Clone, Default)]
pub struct FakeDirectory {
    state: Arc<Mutex<State>>,
}

pub fn entry(dn: &str, attrs: &[(&str, &str)]) -> Entry {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in attrs {
        map.entry((*name).to_string())
            .or_default()
            .push((*value).to_string());
    }
    Entry {
        dn: dn.to_string(),
        attrs: map,
    }
}

impl FakeDirectory {
    pub fn with_password(self, dn: &str, password: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .passwords
            .insert(dn.to_string(), password.to_string());
        self
    }

    pub fn with_search(self, base: &str, filter: &str, entries: Vec<Entry>) -> Self {
        self.state
            .lock()
            .unwrap()
            .searches
            .insert((base.to_string(), filter.to_string()), entries);
        self
    }

    pub fn unavailable(self) -> Self {
        self.state.lock().unwrap().unavailable = true;
        self
    }

    pub fn open_connections(&self) -> usize {
        self.state.lock().unwrap().open_connections
    }

    pub fn binds(&self) -> Vec<String> {
        self.state.lock().unwrap().binds.clone()
    }
}

struct FakeConnection {
    state: Arc<Mutex<State>>,
    closed: bool,
}

#[async_trait]
impl Connector for FakeDirectory {
    async fn connect(&self, _config: &Config) -> Result<Box<dyn Directory>, Error> {
        let mut state = self.state.lock().unwrap();
        if state.unavailable {
            return Err(Error::Unavailable("connection refused".to_string()));
        }
        state.open_connections += 1;
        Ok(Box::new(FakeConnection {
            state: self.state.clone(),
            closed: false,
        }))
    }
}

#[async_trait]
impl Directory for FakeConnection {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<bool, Error> {
        let mut state = self.state.lock().unwrap();
        state.binds.push(dn.to_string());
        Ok(state.passwords.get(dn).is_some_and(|p| p == password))
    }

    async fn search(
        &mut self,
        base: &str,
        _scope: Scope,
        filter: &str,
        _attributes: &[String],
    ) -> Result<Vec<Entry>, Error> {
        let state = self.state.lock().unwrap();
        Ok(state
            .searches
            .get(&(base.to_string(), filter.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.state.lock().unwrap().open_connections -= 1;
        }
    }
}
