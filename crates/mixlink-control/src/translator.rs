//! User-defined address translation, applied once to every inbound message
//! before parsing.
//!
//! The table lives in an XML file under the user settings directory:
//!
//! ```xml
//! <translator>
//!   <osc><from>/example/osc/message</from><to>/mixlink/info/log</to></osc>
//! </translator>
//! ```
//!
//! Reloading replaces the table atomically (readers keep the table they
//! already hold); a missing or unreadable file is replaced by a fresh
//! example file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;

// ── File format ───────────────────────────────────────────────────────────────

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename = "translator")]
struct TranslatorFile {
    #[serde(rename = "osc", default)]
    entries: Vec<OscEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OscEntry {
    from: String,
    to: String,
}

const EXAMPLE_FROM: &str = "/example/osc/message";
const EXAMPLE_TO: &str = "/mixlink/info/log";

// ── Translator ────────────────────────────────────────────────────────────────

pub struct Translator {
    path: PathBuf,
    table: RwLock<Arc<HashMap<String, String>>>,
}

impl Translator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            table: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.table.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Translate an address; unmapped addresses pass through verbatim.
    pub fn translate(&self, address: &str) -> String {
        let table = Arc::clone(&self.table.read().unwrap());
        table
            .get(address)
            .cloned()
            .unwrap_or_else(|| address.to_owned())
    }

    /// Rebuild the table from the file, atomically. On failure a fresh
    /// example file is written and the table holds only the example entry.
    pub fn reload(&self) {
        match self.load() {
            Ok(count) => info!("Loaded {count} OSC translations."),
            Err(e) => {
                info!("No OSC translator file ({e:#}); writing an example.");
                if let Err(e) = self.reset_file() {
                    info!("Could not write OSC translator file: {e:#}");
                }
            }
        }
    }

    fn load(&self) -> anyhow::Result<usize> {
        let text = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        let file: TranslatorFile =
            quick_xml::de::from_str(&text).context("parsing translator file")?;
        let table: HashMap<String, String> = file
            .entries
            .into_iter()
            .map(|e| (e.from, e.to))
            .collect();
        let count = table.len();
        *self.table.write().unwrap() = Arc::new(table);
        Ok(count)
    }

    fn reset_file(&self) -> anyhow::Result<()> {
        let file = TranslatorFile {
            entries: vec![OscEntry {
                from: EXAMPLE_FROM.to_owned(),
                to: EXAMPLE_TO.to_owned(),
            }],
        };
        let xml = quick_xml::se::to_string(&file).context("serializing translator file")?;
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        std::fs::write(&self.path, xml)
            .with_context(|| format!("writing {}", self.path.display()))?;
        let mut table = HashMap::new();
        table.insert(EXAMPLE_FROM.to_owned(), EXAMPLE_TO.to_owned());
        *self.table.write().unwrap() = Arc::new(table);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmapped_addresses_pass_through() {
        let t = Translator::new("/nonexistent/osc.xml");
        assert_eq!(t.translate("/mixlink/output/enable"), "/mixlink/output/enable");
    }

    #[test]
    fn reload_parses_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("osc.xml");
        std::fs::write(
            &path,
            "<translator>\
               <osc><from>/deck/fader1</from><to>/mixlink/output/fading</to></osc>\
               <osc><from>/deck/go</from><to>/mixlink/current/next</to></osc>\
             </translator>",
        )
        .unwrap();
        let t = Translator::new(&path);
        t.reload();
        assert_eq!(t.len(), 2);
        assert_eq!(t.translate("/deck/go"), "/mixlink/current/next");
        assert_eq!(t.translate("/deck/fader1"), "/mixlink/output/fading");
    }

    #[test]
    fn missing_file_resets_to_example() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("osc.xml");
        let t = Translator::new(&path);
        t.reload();
        assert!(path.exists());
        assert_eq!(t.translate(EXAMPLE_FROM), EXAMPLE_TO);
        // the written file loads back
        let t2 = Translator::new(&path);
        t2.reload();
        assert_eq!(t2.len(), 1);
    }

    #[test]
    fn translation_is_idempotent_without_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("osc.xml");
        std::fs::write(
            &path,
            "<translator>\
               <osc><from>/a</from><to>/mixlink/output/enable</to></osc>\
             </translator>",
        )
        .unwrap();
        let t = Translator::new(&path);
        t.reload();
        let once = t.translate("/a");
        assert_eq!(t.translate(&once), once);
    }
}
