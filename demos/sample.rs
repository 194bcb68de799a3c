//! A sample application hosted by azrath-host.
//!
//! Routes requests with `matchit`, keeps a shared counter in the service registry and
//! registers a hosting startup that tunes the runtime.
//!
//! ```text
//! cargo run --example sample -- urls=http://localhost:3000 environment=Development
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use azrath_host::{
    ApplicationBuilder, Body, Host, HostBuilderContext, HostingEnvironment, HttpContext, Response,
    ResponseBuilder, Result, ServiceCollection, Startup, StartupMethods, StartupServices, StatusCode,
    WebHostBuilder,
};
use matchit::Router;

#[derive(Clone, Copy)]
enum Route {
    Welcome,
    Hello,
    Counter,
    Environment,
}

/// Shared request counter, registered as a singleton.
#[derive(Clone, Default)]
struct Counter(Arc<AtomicUsize>);

struct SampleStartup {
    environment: Arc<HostingEnvironment>,
}

impl SampleStartup {
    fn configure_services(&self, _context: &HostBuilderContext, services: &mut ServiceCollection) -> Result<()> {
        services.add_singleton(Counter::default());
        Ok(())
    }

    fn configure(&self, app: &mut ApplicationBuilder) {
        let mut router = Router::new();
        for (path, route) in [
            ("/", Route::Welcome),
            ("/hello/:name", Route::Hello),
            ("/counter", Route::Counter),
            ("/environment", Route::Environment),
        ] {
            if let Err(e) = router.insert(path, route) {
                log::error!("Invalid route {}: {}", path, e);
            }
        }
        let router = Arc::new(router);
        let environment = Arc::clone(&self.environment);

        app.run(move |context: HttpContext| {
            let router = Arc::clone(&router);
            let environment = Arc::clone(&environment);
            async move { route(&router, &environment, context) }
        });
    }

    fn configure_development(&self, app: &mut ApplicationBuilder) {
        app.use_fn(|context: HttpContext, next| async move {
            let method = context.request.method().clone();
            let path = context.request.uri().path().to_owned();
            let response = next(context).await;
            println!("{} {} -> {}", method, path, response.status());
            response
        });
        self.configure(app);
    }
}

fn route(router: &Router<Route>, environment: &HostingEnvironment, context: HttpContext) -> Response {
    let matched = match router.at(context.request.uri().path()) {
        Ok(matched) => matched,
        Err(_) => {
            return ResponseBuilder::new()
                .status(StatusCode::NOT_FOUND)
                .body(Body::new("Not Found"))
                .unwrap_or_default();
        }
    };

    match matched.value {
        Route::Welcome => Response::new(Body::new("Welcome to Azrath!")),
        Route::Hello => {
            let name = matched.params.get("name").unwrap_or("world");
            Response::new(Body::new(format!("Hello, {}!", name)))
        }
        Route::Counter => {
            let count = context
                .services
                .get::<Counter>()
                .map(|counter| counter.0.fetch_add(1, Ordering::SeqCst) + 1)
                .unwrap_or_default();
            Response::new(Body::new(format!("Counter: {}", count)))
        }
        Route::Environment => Response::new(Body::new(environment.environment_name.clone())),
    }
}

impl Startup for SampleStartup {
    fn create(services: &StartupServices<'_>) -> Result<Self> {
        Ok(Self {
            environment: services.environment(),
        })
    }

    fn methods() -> StartupMethods<Self> {
        StartupMethods::new()
            .configure_services(Self::configure_services)
            .configure(Self::configure)
            .configure_for("Development", Self::configure_development)
    }
}

/// Runs the server on a single worker thread unless configured otherwise.
fn sockets_hosting_startup(builder: &mut WebHostBuilder) -> Result<()> {
    if builder.get_setting("worker_threads").is_none() {
        builder.use_setting("worker_threads", "1");
    }
    Ok(())
}

fn main() -> Result<()> {
    let mut builder = Host::create_default_builder(std::env::args().skip(1));
    builder.add_hosting_startup("Sockets", sockets_hosting_startup);
    builder.configure_web_host_defaults(|web| {
        web.use_startup::<SampleStartup>();
        Ok(())
    })?;

    println!("Try these routes:");
    println!("  - /");
    println!("  - /hello/your-name");
    println!("  - /counter (increments on each visit)");
    println!("  - /environment");

    builder.build()?.run_blocking()
}
