//! Audio capture device monitor.
//!
//! A dedicated thread owns a GStreamer `DeviceMonitor` filtered to
//! `Audio/Source`: it enumerates the devices already present, flips the
//! initialized latch, then watches the monitor bus for hotplug events. The
//! video recorder consumes the per-device gst-launch lines published here
//! for its mixed-in audio branch.
//!
//! All accessors take the internal lock; the monitor thread is the only
//! mutator.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use gstreamer as gst;
use gstreamer::prelude::*;
use tracing::{debug, info, warn};

// ── Device handle ─────────────────────────────────────────────────────────────

/// One audio capture device, unique by name.
#[derive(Debug, Clone)]
pub struct AudioHandle {
    pub name: String,
    /// Loopback of an output (e.g. a PulseAudio `.monitor` source).
    pub is_monitor: bool,
    /// gst-launch line producing this device's stream.
    pub pipeline: String,
}

// ── DeviceMonitor ─────────────────────────────────────────────────────────────

struct MonitorShared {
    devices: Mutex<Vec<AudioHandle>>,
    init: (Mutex<bool>, Condvar),
    bus: Mutex<Option<gst::Bus>>,
    removed_hook: Mutex<Option<Box<dyn Fn(&str) + Send + Sync>>>,
}

impl MonitorShared {
    fn add(&self, device: &gst::Device) {
        let name = device.display_name().to_string();
        let mut devices = self.devices.lock().unwrap();
        if devices.iter().any(|d| d.name == name) {
            return;
        }
        // a device we cannot reconstruct a launch line for is skipped
        let Some(pipeline) = launch_line(device) else {
            debug!("Ignoring audio device '{name}' (no launch line)");
            return;
        };
        let is_monitor = pipeline.ends_with("monitor");
        info!("Audio device '{name}' is plugged-in.");
        devices.push(AudioHandle {
            name,
            is_monitor,
            pipeline,
        });
    }

    fn remove(&self, device: &gst::Device) {
        let name = device.display_name().to_string();
        let mut devices = self.devices.lock().unwrap();
        if let Some(pos) = devices.iter().position(|d| d.name == name) {
            info!("Audio device '{name}' unplugged.");
            devices.remove(pos);
            drop(devices);
            if let Some(hook) = &*self.removed_hook.lock().unwrap() {
                hook(&name);
            }
        }
    }
}

/// Tracks audio capture devices hot-plugging in and out of the host.
pub struct DeviceMonitor {
    shared: Arc<MonitorShared>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl DeviceMonitor {
    /// Start monitoring in the background. Enumeration happens on the
    /// monitor thread; use [`wait_initialized`](Self::wait_initialized)
    /// before trusting the accessors.
    pub fn start() -> Self {
        let shared = Arc::new(MonitorShared {
            devices: Mutex::new(Vec::new()),
            init: (Mutex::new(false), Condvar::new()),
            bus: Mutex::new(None),
            removed_hook: Mutex::new(None),
        });

        let worker = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("audio-monitor".into())
            .spawn(move || run_monitor(worker))
            .ok();
        if thread.is_none() {
            warn!("Audio monitor thread failed to start");
            // surface as initialized-empty rather than blocking waiters
            *shared.init.0.lock().unwrap() = true;
            shared.init.1.notify_all();
        }

        Self { shared, thread }
    }

    /// Block until the first enumeration pass completed (bounded at 5 s).
    /// On failure the device list is simply empty.
    pub fn wait_initialized(&self) {
        let (lock, cvar) = &self.shared.init;
        let mut done = lock.lock().unwrap();
        while !*done {
            let (guard, timeout) = cvar
                .wait_timeout(done, Duration::from_secs(5))
                .unwrap();
            done = guard;
            if timeout.timed_out() {
                warn!("Audio monitor initialization timed out");
                break;
            }
        }
    }

    pub fn count(&self) -> usize {
        self.shared.devices.lock().unwrap().len()
    }

    pub fn name(&self, index: usize) -> Option<String> {
        self.shared
            .devices
            .lock()
            .unwrap()
            .get(index)
            .map(|d| d.name.clone())
    }

    pub fn is_monitor(&self, index: usize) -> bool {
        self.shared
            .devices
            .lock()
            .unwrap()
            .get(index)
            .is_some_and(|d| d.is_monitor)
    }

    pub fn pipeline(&self, index: usize) -> Option<String> {
        self.shared
            .devices
            .lock()
            .unwrap()
            .get(index)
            .map(|d| d.pipeline.clone())
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.shared
            .devices
            .lock()
            .unwrap()
            .iter()
            .position(|d| d.name == name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    /// Called with the device name whenever a device is unplugged; used to
    /// clear a recording audio selection that just vanished.
    pub fn set_removed_hook(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.shared.removed_hook.lock().unwrap() = Some(Box::new(hook));
    }

    /// Stop the monitor thread.
    pub fn terminate(&mut self) {
        if let Some(bus) = self.shared.bus.lock().unwrap().take() {
            let stop = gst::message::Application::new(gst::Structure::new_empty(
                "mixlink-audio-stop",
            ));
            let _ = bus.post(stop);
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for DeviceMonitor {
    fn drop(&mut self) {
        self.terminate();
    }
}

// ── Monitor thread ────────────────────────────────────────────────────────────

fn run_monitor(shared: Arc<MonitorShared>) {
    let monitor = gst::DeviceMonitor::new();
    monitor.set_show_all_devices(true);

    let caps = gst::Caps::new_empty_simple("audio/x-raw");
    let _filter = monitor.add_filter(Some("Audio/Source"), Some(&caps));

    // devices already plugged when we start
    for device in monitor.devices() {
        shared.add(&device);
    }

    // first pass done: release wait_initialized
    *shared.init.0.lock().unwrap() = true;
    shared.init.1.notify_all();

    let bus = monitor.bus();
    *shared.bus.lock().unwrap() = Some(bus.clone());

    if monitor.start().is_err() {
        info!("Audio discovery failed.");
        return;
    }

    loop {
        let Some(msg) = bus.timed_pop(gst::ClockTime::NONE) else {
            break;
        };
        match msg.view() {
            gst::MessageView::DeviceAdded(added) => shared.add(&added.device()),
            gst::MessageView::DeviceRemoved(removed) => shared.remove(&removed.device()),
            gst::MessageView::Application(_) => break,
            _ => {}
        }
    }

    monitor.stop();
}

// ── Launch-line reconstruction ────────────────────────────────────────────────

const IGNORED_PROPS: &[&str] = &["name", "parent", "direction", "template", "caps"];

/// Rebuild the gst-launch line for a device: factory name followed by every
/// readwrite property that differs from the factory default.
fn launch_line(device: &gst::Device) -> Option<String> {
    let element = device.create_element(None).ok()?;
    let factory = element.factory()?;
    let mut line = factory.name().to_string();

    let Ok(pristine) = factory.create().build() else {
        return Some(line);
    };

    for pspec in element.list_properties() {
        let prop = pspec.name();
        if IGNORED_PROPS.contains(&prop) {
            continue;
        }
        if !pspec.flags().contains(gst::glib::ParamFlags::READWRITE) {
            continue;
        }
        let value = render_value(&element.property_value(prop));
        let default = render_value(&pristine.property_value(prop));
        if let Some(value) = value {
            if Some(&value) != default.as_ref() {
                line.push_str(&format!(" {prop}={value}"));
            }
        }
    }

    Some(line)
}

fn render_value(value: &gst::glib::Value) -> Option<String> {
    use gst::glib::Type;
    match value.type_() {
        Type::STRING => value.get::<Option<String>>().ok().flatten(),
        Type::BOOL => value.get::<bool>().ok().map(|v| v.to_string()),
        Type::I32 => value.get::<i32>().ok().map(|v| v.to_string()),
        Type::U32 => value.get::<u32>().ok().map(|v| v.to_string()),
        Type::I64 => value.get::<i64>().ok().map(|v| v.to_string()),
        Type::U64 => value.get::<u64>().ok().map(|v| v.to_string()),
        _ => None,
    }
}
