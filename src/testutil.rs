//! Scripted browser double shared by unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::browser::{Driver, DriverError};

/// Driver whose page state is scripted up front. Selectors in the
/// `present` set exist; clicking a selector can remove others, which is
/// enough to model walls that clear and buttons that vanish.
#[derive(Default)]
pub struct FakeDriver {
    present: HashSet<String>,
    attributes: HashMap<(String, String), String>,
    texts: HashMap<String, String>,
    removals: HashMap<String, Vec<String>>,
    download_results: VecDeque<Result<bool, DriverError>>,
    save_data: Vec<u8>,
    navigations: Vec<String>,
    clicks: Vec<String>,
    typed: Vec<(String, String)>,
    saved: Vec<(String, PathBuf)>,
    refreshes: usize,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_present<I, S>(mut self, selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.present.extend(selectors.into_iter().map(Into::into));
        self
    }

    pub fn with_attribute(
        mut self,
        selector: impl Into<String>,
        attribute: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.attributes
            .insert((selector.into(), attribute.into()), value.into());
        self
    }

    #[allow(dead_code)]
    pub fn with_text(mut self, selector: impl Into<String>, text: impl Into<String>) -> Self {
        self.texts.insert(selector.into(), text.into());
        self
    }

    /// Bytes that `save_resource` writes to its destination.
    pub fn with_save_data(mut self, data: Vec<u8>) -> Self {
        self.save_data = data;
        self
    }

    /// Clicking `selector` removes `victims` from the present set.
    pub fn remove_on_click<I, S>(mut self, selector: impl Into<String>, victims: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.removals
            .entry(selector.into())
            .or_default()
            .extend(victims.into_iter().map(Into::into));
        self
    }

    /// Queue the result of the next `click_for_download`; an empty queue
    /// reports `Ok(true)`.
    pub fn push_download_result(mut self, result: Result<bool, DriverError>) -> Self {
        self.download_results.push_back(result);
        self
    }

    pub fn navigations(&self) -> &[String] {
        &self.navigations
    }

    pub fn clicks(&self) -> Vec<String> {
        self.clicks.clone()
    }

    pub fn typed(&self) -> Vec<(String, String)> {
        self.typed.clone()
    }

    #[allow(dead_code)]
    pub fn saved(&self) -> &[(String, PathBuf)] {
        &self.saved
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes
    }

    fn apply_removals(&mut self, selector: &str) {
        if let Some(victims) = self.removals.get(selector).cloned() {
            for victim in victims {
                self.present.remove(&victim);
            }
        }
    }
}

#[async_trait]
impl Driver for FakeDriver {
    async fn navigate(&mut self, url: &str) -> Result<(), DriverError> {
        self.navigations.push(url.to_string());
        Ok(())
    }

    async fn wait_for_load(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn exists(&mut self, selector: &str, _timeout: Duration) -> bool {
        self.present.contains(selector)
    }

    async fn click(&mut self, selector: &str) -> Result<(), DriverError> {
        if !self.present.contains(selector) {
            return Err(DriverError::NotFound(selector.to_string()));
        }
        self.clicks.push(selector.to_string());
        self.apply_removals(selector);
        Ok(())
    }

    async fn click_for_download(
        &mut self,
        selector: &str,
        _dir: &Path,
        _timeout: Duration,
    ) -> Result<bool, DriverError> {
        if !self.present.contains(selector) {
            return Err(DriverError::NotFound(selector.to_string()));
        }
        self.clicks.push(selector.to_string());
        self.apply_removals(selector);
        self.download_results.pop_front().unwrap_or(Ok(true))
    }

    async fn read_attribute(
        &mut self,
        selector: &str,
        attribute: &str,
    ) -> Result<Option<String>, DriverError> {
        if !self.present.contains(selector) {
            return Err(DriverError::NotFound(selector.to_string()));
        }
        Ok(self
            .attributes
            .get(&(selector.to_string(), attribute.to_string()))
            .cloned())
    }

    async fn read_text(&mut self, selector: &str) -> Result<Option<String>, DriverError> {
        if !self.present.contains(selector) {
            return Err(DriverError::NotFound(selector.to_string()));
        }
        Ok(self.texts.get(selector).cloned())
    }

    async fn attribute_all(
        &mut self,
        selector: &str,
        attribute: &str,
    ) -> Result<Vec<String>, DriverError> {
        if !self.present.contains(selector) {
            return Err(DriverError::NotFound(selector.to_string()));
        }
        Ok(self
            .attributes
            .get(&(selector.to_string(), attribute.to_string()))
            .cloned()
            .into_iter()
            .collect())
    }

    async fn type_text(&mut self, selector: &str, text: &str) -> Result<(), DriverError> {
        if !self.present.contains(selector) {
            return Err(DriverError::NotFound(selector.to_string()));
        }
        self.typed.push((selector.to_string(), text.to_string()));
        Ok(())
    }

    async fn save_resource(&mut self, url: &str, dest: &Path) -> Result<(), DriverError> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DriverError::Protocol(e.to_string()))?;
        }
        std::fs::write(dest, &self.save_data)
            .map_err(|e| DriverError::Protocol(e.to_string()))?;
        self.saved.push((url.to_string(), dest.to_path_buf()));
        Ok(())
    }

    async fn refresh(&mut self) -> Result<(), DriverError> {
        self.refreshes += 1;
        Ok(())
    }

    async fn quit(&mut self) -> Result<(), DriverError> {
        Ok(())
    }
}
