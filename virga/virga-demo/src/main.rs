//! Meshlet cluster-culling demo: loads one glTF model, clusters it into
//! meshlets and renders it with task/mesh shader pipelines.

mod renderer;
mod scene;
mod strategy;

use std::path::PathBuf;

use winit::application::ApplicationHandler;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};

use renderer::Renderer;
use strategy::RenderMode;
use virga_rhi::VulkanContext;

const WINDOW_WIDTH: u32 = 1280;
const WINDOW_HEIGHT: u32 = 720;
const DEFAULT_MODEL: &str = "assets/model.glb";
const SHADER_DIR: &str = "shaders";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Cluster(#[from] virga_cluster::Error),
    #[error(transparent)]
    Rhi(#[from] virga_rhi::Error),
    #[error("vulkan: {0}")]
    Vulkan(#[from] ash::vk::Result),
    #[error("event loop: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),
    #[error("window creation: {0}")]
    Window(#[from] winit::error::OsError),
    #[error("frame slot {0} still in flight")]
    SlotInFlight(usize),
}

pub type Result<T> = std::result::Result<T, Error>;

struct App {
    model_path: PathBuf,
    state: Option<AppState>,
    failure: Option<Error>,
}

struct AppState {
    // Drop order: the renderer owns the surface, so it goes before the
    // window it was created from.
    renderer: Renderer,
    window: Window,
}

impl App {
    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<AppState> {
        let attributes = Window::default_attributes()
            .with_title("virga")
            .with_inner_size(winit::dpi::PhysicalSize::new(WINDOW_WIDTH, WINDOW_HEIGHT))
            .with_resizable(false);
        let window = event_loop.create_window(attributes)?;

        let model = virga_cluster::load_meshlet_model(&self.model_path)?;
        log::info!(
            "loaded {}: {} vertices, {} meshlets",
            self.model_path.display(),
            model.vertices.len(),
            model.meshlets.len()
        );

        let context = VulkanContext::new(&window)?;
        let size = window.inner_size();
        let renderer = Renderer::new(
            context,
            size.width,
            size.height,
            std::path::Path::new(SHADER_DIR),
            &model,
        )?;
        Ok(AppState { renderer, window })
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: Error) {
        self.failure = Some(error);
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }
        match self.init(event_loop) {
            Ok(state) => self.state = Some(state),
            Err(e) => self.fail(event_loop, e),
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key,
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => match logical_key {
                Key::Named(NamedKey::Escape) => event_loop.exit(),
                Key::Character(c) => match c.as_str() {
                    "1" => state.renderer.set_mode(RenderMode::MeshOnly),
                    "2" => state.renderer.set_mode(RenderMode::Sample),
                    "3" => state.renderer.set_mode(RenderMode::ClusterCull),
                    _ => {}
                },
                _ => {}
            },
            WindowEvent::RedrawRequested => {
                if let Err(e) = state.renderer.draw_frame() {
                    self.fail(event_loop, e);
                    return;
                }
                state.window.request_redraw();
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = self.state.as_ref() {
            state.window.request_redraw();
        }
    }
}

fn run() -> Result<()> {
    let model_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL));

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);
    let mut app = App {
        model_path,
        state: None,
        failure: None,
    };
    event_loop.run_app(&mut app)?;

    if let Some(state) = app.state.take() {
        state.renderer.wait_idle()?;
    }
    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(e) = run() {
        log::error!("fatal: {e}");
        std::process::exit(1);
    }
}
