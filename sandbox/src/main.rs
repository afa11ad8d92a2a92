// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A small application driving the runtime: a scene module loads its level
//! on the resource worker, receives it back on the runtime thread, renders
//! a few frames and a countdown standard closes the runtime.

use anyhow::{Context, Result};
use lattice_core::{RuntimeConfig, Timer};
use lattice_runtime::processing::{ContextSender, Request};
use lattice_runtime::{
    EventChange, Events, Extension, Hook, Hooks, Module, ModuleKey, Processors, Profiler, Runtime,
    RuntimeEvent, Standard, Standards, Tasks,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Level data produced on the resource worker.
#[derive(Debug, Clone)]
struct Level {
    name: String,
    tiles: Vec<u8>,
}

fn load_level(name: &str) -> Result<Level> {
    // Stand-in for disk I/O.
    thread::sleep(Duration::from_millis(150));
    let tiles = (0..64u32).map(|i| (i * 7 % 5) as u8).collect();
    Ok(Level {
        name: name.to_owned(),
        tiles,
    })
}

#[derive(Default)]
struct Scene {
    level: Option<Level>,
    incoming: Arc<Mutex<Option<Level>>>,
    frames: u64,
    steps: u64,
}

impl Scene {
    fn init(&mut self, runtime: &Runtime) -> Result<()> {
        let processors = runtime.get::<Processors>()?;
        let context: ContextSender = processors
            .try_borrow()?
            .context_sender()
            .context("context processor missing")?;

        let incoming = Arc::clone(&self.incoming);
        let request = Request::resource(move || -> Result<()> {
            let level = load_level("meadow")?;
            log::info!("Loaded level `{}` on the resource worker.", level.name);

            let incoming = Arc::clone(&incoming);
            // Hand the result back to the runtime thread.
            context.send(Arc::new(move || -> Result<()> {
                if let Ok(mut slot) = incoming.lock() {
                    *slot = Some(level.clone());
                }
                Ok(())
            }));
            Ok(())
        });
        processors.try_borrow()?.dispatcher().send_request(request);

        runtime.get::<Tasks>()?.try_borrow()?.queue().add_task(|runtime| {
            log::info!("First logic step at t={:.3}s", runtime.time_secs());
            Ok(())
        });

        let incoming = Arc::clone(&self.incoming);
        runtime.get::<Events>()?.try_borrow()?.add_event(EventChange::new(
            move || incoming.lock().map(|slot| slot.is_some()).unwrap_or(false),
            |pending: &bool, _: &Runtime| {
                log::debug!("Level hand-off pending: {pending}");
                Ok(())
            },
        ));
        Ok(())
    }

    fn update(&mut self, _: &Runtime) -> Result<()> {
        self.steps += 1;
        if self.level.is_none() {
            let arrived = self.incoming.lock().ok().and_then(|mut slot| slot.take());
            if let Some(level) = arrived {
                log::info!(
                    "Level `{}` ready after {} logic steps ({} tiles).",
                    level.name,
                    self.steps,
                    level.tiles.len()
                );
                self.level = Some(level);
            }
        }
        Ok(())
    }

    fn render(&mut self, _: &Runtime) -> Result<()> {
        if self.level.is_some() {
            self.frames += 1;
        }
        Ok(())
    }

    fn profile(&mut self, runtime: &Runtime) -> Result<()> {
        runtime.profile("Scene", "Frames", self.frames);
        runtime.profile("Scene", "Logic steps", self.steps);
        Ok(())
    }
}

impl Module for Scene {
    fn create() -> Result<Self> {
        Ok(Self::default())
    }

    fn dependencies() -> Vec<ModuleKey> {
        vec![
            ModuleKey::of::<Processors>(),
            ModuleKey::of::<Tasks>(),
            ModuleKey::of::<Standards>(),
            ModuleKey::of::<Events>(),
        ]
    }

    fn hooks(hooks: &mut Hooks<Self>) {
        hooks
            .on(Hook::Init, Self::init)
            .on(Hook::UpdatePre, Self::update)
            .on(Hook::Render, Self::render)
            .on(Hook::Profile, Self::profile)
            .on(Hook::Dispose, |scene, _| {
                log::info!("Scene rendered {} frames.", scene.frames);
                Ok(())
            });
    }
}

/// Closes the runtime once its timer runs out.
struct Countdown {
    timer: Timer,
}

impl Extension for Countdown {
    fn is_active(&self) -> bool {
        true
    }

    fn init(&mut self, _: &Runtime) -> Result<()> {
        self.timer.reset_start_time();
        log::info!("Closing in {:?}.", self.timer.interval());
        Ok(())
    }
}

impl Standard for Countdown {
    fn update(&mut self, runtime: &Runtime) -> Result<()> {
        if self.timer.is_passed_time() {
            runtime.post_event(RuntimeEvent::CloseRequested);
        }
        Ok(())
    }

    fn profile(&self, runtime: &Runtime) {
        runtime.profile("Countdown", "Remaining", format_args!("{:?}", self.timer.remaining()));
    }
}

fn main() -> Result<()> {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = match std::env::args().nth(1) {
        Some(path) => RuntimeConfig::from_file(&path)
            .with_context(|| format!("failed to load runtime config from {path}"))?,
        None => RuntimeConfig {
            fps_limit: Some(60),
            ..RuntimeConfig::default()
        },
    };

    let runtime = Runtime::new(config)?;
    runtime.register::<Scene>()?;
    runtime.register_extension::<Standards, dyn Standard>(Rc::new(RefCell::new(Countdown {
        timer: Timer::new(Duration::from_secs(2)),
    })))?;
    let profiler = runtime.get::<Profiler>()?;

    runtime.run()?;

    log::info!("Final profile:\n{}", profiler.borrow().summary());
    Ok(())
}
