//! Shared helpers for `xrlift-layer` integration tests.
//!
//! Tests need a headless `wgpu` device; machines without a usable adapter (or
//! without compute shaders) skip instead of failing. Set
//! `XRLIFT_REQUIRE_GPU=1` to turn skips into failures on CI runners that are
//! known to have a GPU.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

/// Route layer logs through a test subscriber; repeated calls are fine.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn require_gpu() -> bool {
    let Ok(raw) = std::env::var("XRLIFT_REQUIRE_GPU") else {
        return false;
    };
    let v = raw.trim();
    v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes")
}

pub fn skip_or_panic(test_name: &str, reason: &str) {
    if require_gpu() {
        panic!("XRLIFT_REQUIRE_GPU is enabled but {test_name} cannot run: {reason}");
    }
    eprintln!("skipping {test_name}: {reason}");
}

pub struct TestGpu {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
}

fn ensure_xdg_runtime_dir() {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let needs_runtime_dir = match std::env::var("XDG_RUNTIME_DIR") {
            Ok(dir) if !dir.is_empty() => match std::fs::metadata(&dir) {
                Ok(meta) => !meta.is_dir() || (meta.permissions().mode() & 0o077) != 0,
                Err(_) => true,
            },
            _ => true,
        };
        if needs_runtime_dir {
            let dir = std::env::temp_dir().join(format!(
                "xrlift-xdg-runtime-{}",
                std::process::id()
            ));
            let _ = std::fs::create_dir_all(&dir);
            let _ = std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700));
            std::env::set_var("XDG_RUNTIME_DIR", &dir);
        }
    }
}

async fn create_gpu() -> Option<TestGpu> {
    ensure_xdg_runtime_dir();

    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY | wgpu::Backends::GL,
        ..Default::default()
    });
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await?;

    let downlevel = adapter.get_downlevel_capabilities();
    if !downlevel
        .flags
        .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS)
    {
        return None;
    }

    // Timestamp queries are optional; the stats path has a host-side
    // fallback, but exercise the query path where the adapter has it.
    let features = adapter.features() & wgpu::Features::TIMESTAMP_QUERY;
    let (device, queue) = adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("xrlift tests"),
                required_features: features,
                required_limits: wgpu::Limits::downlevel_defaults(),
            },
            None,
        )
        .await
        .ok()?;

    Some(TestGpu {
        device: Arc::new(device),
        queue: Arc::new(queue),
    })
}

/// Return a shared, leaked device for this integration-test binary.
///
/// Some drivers misbehave when devices are created and dropped repeatedly in
/// one process, so every test reuses a single device behind a mutex.
pub fn test_gpu(test_name: &str) -> Option<MutexGuard<'static, TestGpu>> {
    static GPU: OnceLock<Option<&'static Mutex<TestGpu>>> = OnceLock::new();

    init_logging();

    let gpu = GPU.get_or_init(|| {
        pollster::block_on(create_gpu()).map(|gpu| &*Box::leak(Box::new(Mutex::new(gpu))))
    });

    match gpu {
        Some(gpu) => Some(gpu.lock().unwrap()),
        None => {
            skip_or_panic(test_name, "no usable wgpu adapter (compute required)");
            None
        }
    }
}
