//! Startup orchestration.
//!
//! # Responsibilities
//! - Turn a validated `GatewayConfig` into a populated `Router`
//! - Bind the listener and serve until a signal arrives
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Every proxy route gets its own balancer; targets are never shared
//! - Listeners start last (traffic only when routes are registered)

use axum::http::Method;

use crate::config::{GatewayConfig, ProxyRouteConfig};
use crate::error::{Error, Result};
use crate::http::Server;
use crate::lifecycle::{signals, Shutdown};
use crate::load_balancer::ProxyTarget;
use crate::proxy::{proxy_with_config, ProxyConfig};
use crate::routing::Router;

/// Build the router described by `config`.
pub fn build_router(config: &GatewayConfig) -> Result<Router> {
    let router = Router::with_default_middleware((&config.router).into());

    for files in &config.static_files {
        router.serve_files(&files.prefix, files.root.clone())?;
        tracing::debug!(prefix = %files.prefix, root = %files.root.display(), "Static files mounted");
    }

    for route in &config.proxies {
        register_proxy(&router, route)?;
    }

    Ok(router)
}

fn register_proxy(router: &Router, route: &ProxyRouteConfig) -> Result<()> {
    let targets = route
        .targets
        .iter()
        .map(|t| {
            let target = ProxyTarget::new(&t.name, &t.url)
                .map_err(|err| Error::Balancer(format!("target {:?}: {err}", t.name)))?;
            Ok(match t.weight {
                Some(weight) => target.with_weight(weight),
                None => target,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let (load_balancer, rejected) = route.balancer.build_with(targets);
    if !rejected.is_empty() {
        return Err(Error::Balancer(format!(
            "{} balancer rejected targets {:?} for {:?}",
            route.balancer, rejected, route.pattern
        )));
    }

    let config = route
        .rewrite
        .iter()
        .fold(ProxyConfig::new(load_balancer), |config, rule| {
            config.rewrite(&rule.from, &rule.to)
        });
    let handler = proxy_with_config(config)?;

    if route.methods.is_empty() {
        router.any(&route.pattern, [handler]);
    } else {
        for method in &route.methods {
            let method: Method = method.parse().map_err(|_| {
                Error::invalid_route(&route.pattern, format!("bad method {method:?}"))
            })?;
            router.handle(method, &route.pattern, [handler.clone()]);
        }
    }

    tracing::info!(
        pattern = %route.pattern,
        balancer = %route.balancer,
        targets = route.targets.len(),
        "Proxy route registered"
    );
    Ok(())
}

/// Build, bind and serve until SIGINT/SIGTERM.
pub async fn run(config: GatewayConfig) -> Result<()> {
    let router = build_router(&config)?;
    let shutdown = Shutdown::new();
    let signals = signals::spawn_listener(shutdown.clone());

    let result = Server::new(router, config.listener).run(shutdown).await;
    signals.abort();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn test_build_router_registers_proxies() {
        let config = parse_config(
            r#"
            [[proxies]]
            pattern = "/api/*path"
            methods = ["GET", "POST"]

            [[proxies.targets]]
            name = "a"
            url = "http://127.0.0.1:9001"

            [[proxies.rewrite]]
            from = "/api/*"
            to = "/$1"

            [[proxies]]
            pattern = "/ws"

            [[proxies.targets]]
            name = "b"
            url = "ws://127.0.0.1:9002"
            "#,
        )
        .unwrap();
        let router = build_router(&config).unwrap();
        let routes = router.routes();

        let api: Vec<_> = routes.iter().filter(|r| r.path == "/api/*path").collect();
        assert_eq!(api.len(), 2);
        assert_eq!(routes.iter().filter(|r| r.path == "/ws").count(), 7);
    }

    #[test]
    fn test_rewrite_globs_are_escaped() {
        let mut config = GatewayConfig::default();
        config.proxies.push(
            toml::from_str(
                r#"
                pattern = "/x"
                targets = [{ name = "a", url = "http://127.0.0.1:1" }]
                rewrite = [{ from = "(", to = "/" }]
                "#,
            )
            .unwrap(),
        );
        assert!(build_router(&config).is_ok());
    }
}
