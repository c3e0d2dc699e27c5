mod common;

use common::*;
use portico::{
    Address, CallContext, DispatchTable, Function, FunctionData, FunctionRegistry, LocalPortal,
    NativeFunction, Portal, PortalError, PortalRegistry, Service, ServiceRegistry, ServiceSchema,
    TestingPortal,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

// ========== Local portal ==========

#[tokio::test]
async fn test_add_through_local_portal() {
    init_tracing();
    let portal = LocalPortal::new();
    let ctx = CallContext::new();

    let address = portal.apply(&ctx, add()).await.unwrap();
    assert_eq!(address.to_string(), "local://add");

    let function = portal.resolve_function(&ctx, &address).await.unwrap();
    let out = function
        .call(&ctx, FunctionData::new().with("a", 10.0).with("b", 5.0))
        .await
        .unwrap();
    assert_eq!(out.get_f64("result"), Some(15.0));
}

#[tokio::test]
async fn test_resolved_call_matches_direct_call() {
    let portal = LocalPortal::new();
    let ctx = CallContext::new();
    let direct = add();
    let address = portal.apply(&ctx, direct.clone()).await.unwrap();
    let resolved = portal.resolve_function(&ctx, &address).await.unwrap();

    for (a, b) in [(0.0, 0.0), (1.5, -2.5), (1e9, 3.0)] {
        let input = FunctionData::new().with("a", a).with("b", b);
        assert_eq!(
            resolved.call(&ctx, input.clone()).await.unwrap(),
            direct.call(&ctx, input).await.unwrap()
        );
    }

    // errors are the same kind too
    let missing = FunctionData::new().with("a", 1.0);
    assert!(matches!(
        resolved.call(&ctx, missing).await,
        Err(PortalError::ExecutionFailed { .. })
    ));
}

#[tokio::test]
async fn test_duplicate_apply_keeps_first() {
    let portal = LocalPortal::new();
    let ctx = CallContext::new();
    let address = portal.apply(&ctx, echo()).await.unwrap();

    let replacement = NativeFunction::sync("echo", |_| Ok(FunctionData::value("replaced"))).shared();
    assert!(matches!(
        portal.apply(&ctx, replacement).await,
        Err(PortalError::DuplicateName { .. })
    ));

    let function = portal.resolve_function(&ctx, &address).await.unwrap();
    let out = function
        .call(&ctx, FunctionData::new().with("message", "still here"))
        .await
        .unwrap();
    assert_eq!(out.get_str("echo"), Some("still here"));
}

#[tokio::test]
async fn test_unknown_local_function() {
    let portal = LocalPortal::new();
    let result = portal
        .resolve_function(&CallContext::new(), &Address::local("ghost").unwrap())
        .await;
    assert!(matches!(result, Err(PortalError::NotFound { .. })));
}

#[tokio::test]
async fn test_cancelled_context_aborts_call() {
    let portal = LocalPortal::new();
    let ctx = CallContext::new();
    let address = portal
        .apply(&ctx, slow("sleepy", Duration::from_secs(10)))
        .await
        .unwrap();
    let function = portal.resolve_function(&ctx, &address).await.unwrap();

    let call_ctx = CallContext::new();
    let canceller = call_ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(2),
        function.call(&call_ctx, FunctionData::new()),
    )
    .await
    .expect("call must not hang");
    assert!(matches!(result, Err(PortalError::Cancelled { .. })));

    let deadline_ctx = CallContext::with_timeout(Duration::from_millis(50));
    assert!(matches!(
        function.call(&deadline_ctx, FunctionData::new()).await,
        Err(PortalError::Timeout { .. })
    ));
}

#[tokio::test]
async fn test_lifecycle() {
    let portal = LocalPortal::new();
    let ctx = CallContext::new();

    assert!(matches!(
        portal.health(&ctx).await,
        Err(PortalError::NotRunning { .. })
    ));
    portal.start(&ctx).await.unwrap();
    portal.health(&ctx).await.unwrap();
    assert!(matches!(
        portal.start(&ctx).await,
        Err(PortalError::AlreadyRunning { .. })
    ));
    portal.stop(&ctx).await.unwrap();
    // stopping twice is a no-op
    portal.stop(&ctx).await.unwrap();
}

// ========== Registries ==========

#[tokio::test]
async fn test_concurrent_registration() {
    let registry = Arc::new(FunctionRegistry::new());
    let tasks: Vec<_> = (0..64)
        .map(|i| {
            let registry = registry.clone();
            tokio::spawn(async move {
                let name = format!("fn-{}", i);
                registry
                    .register(&name, NativeFunction::sync(name.clone(), Ok).shared())
                    .unwrap();
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(registry.count(), 64);
    let names: HashSet<String> = registry.list().into_iter().collect();
    assert_eq!(names.len(), 64);
    assert!((0..64).all(|i| names.contains(&format!("fn-{}", i))));
}

#[tokio::test]
async fn test_concurrent_duplicate_registration_has_one_winner() {
    let registry = Arc::new(FunctionRegistry::new());
    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .register("contested", NativeFunction::sync("contested", Ok).shared())
                    .is_ok()
            })
        })
        .collect();

    let mut winners = 0;
    for task in tasks {
        if task.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(registry.count(), 1);
}

#[tokio::test]
async fn test_service_method_expansion() {
    let registry = ServiceRegistry::new();
    registry
        .register_service(
            "Users",
            ServiceSchema::new("Users").method("Get").method("Create"),
        )
        .unwrap();

    let methods: HashSet<String> = registry
        .list_service_methods("Users")
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(
        methods,
        HashSet::from(["Get".to_string(), "Create".to_string()])
    );
    assert!(registry.functions().exists("Users.Get"));
    assert!(registry.functions().exists("Users.Create"));

    registry.unregister_service("Users").unwrap();
    assert!(!registry.functions().exists("Users.Get"));
}

// ========== Services through the local portal ==========

struct Counter {
    step: i64,
}

#[tokio::test]
async fn test_bound_service_through_local_portal() {
    let portal = LocalPortal::new();
    let ctx = CallContext::new();

    let table = DispatchTable::bind(Arc::new(Counter { step: 2 }))
        .method("Next", |counter, data| {
            let value = data.get_i64("value").unwrap_or(0);
            Ok(FunctionData::new().with("value", value + counter.step))
        })
        .build();
    let service = Service::new(ServiceSchema::new("Counter").method("Next")).with_instance(table);

    let address = portal.apply_service(&ctx, service).await.unwrap();
    assert_eq!(address.to_string(), "local://Counter");

    let handle = portal.resolve_service(&ctx, &address).await.unwrap();
    assert_eq!(handle.methods(), Some(vec!["Next".to_string()]));
    let out = handle
        .call(&ctx, "Next", FunctionData::new().with("value", 40))
        .await
        .unwrap();
    assert_eq!(out.get_i64("value"), Some(42));

    let method = portal
        .resolve_function(&ctx, &Address::parse("local://Counter/Next").unwrap())
        .await
        .unwrap();
    assert_eq!(method.name(), "Counter.Next");

    assert!(matches!(
        handle.call(&ctx, "Reset", FunctionData::new()).await,
        Err(PortalError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_instance_missing_method_is_rejected() {
    let portal = LocalPortal::new();
    let table = DispatchTable::new().sync("Get", Ok);
    let service = Service::new(ServiceSchema::new("Users").method("Get").method("Create"))
        .with_instance(table);

    assert!(matches!(
        portal.apply_service(&CallContext::new(), service).await,
        Err(PortalError::InvalidArgument { .. })
    ));
    assert!(!portal.services().exists("Users"));
    assert!(!portal.services().functions().exists("Users.Get"));
}

// ========== Testing portal and routing ==========

#[tokio::test]
async fn test_mock_portal_records_calls() {
    let portal = TestingPortal::new();
    let ctx = CallContext::new();

    let ok = portal
        .mock_value("quote", FunctionData::new().with("price", 9.5))
        .unwrap();
    let broken = portal.mock_error("outage", "upstream down").unwrap();
    assert_eq!(ok.to_string(), "mock://quote");

    let quote = portal.resolve_function(&ctx, &ok).await.unwrap();
    let out = quote
        .call(&ctx, FunctionData::new().with("symbol", "ACME"))
        .await
        .unwrap();
    assert_eq!(out.get_f64("price"), Some(9.5));

    let outage = portal.resolve_function(&ctx, &broken).await.unwrap();
    assert!(outage.call(&ctx, FunctionData::new()).await.is_err());

    let history = portal.history();
    assert_eq!(history.len(), 2);
    let first = &history.calls_to("quote")[0];
    assert_eq!(first.input.get_str("symbol"), Some("ACME"));
    assert!(first.succeeded());
    assert!(!history.last().unwrap().succeeded());
}

#[tokio::test]
async fn test_registry_routes_by_scheme() {
    let registry = PortalRegistry::with_defaults();
    let ctx = CallContext::new();

    let local = registry.get_portal_for_scheme("local").unwrap();
    let address = local.apply(&ctx, add()).await.unwrap();

    let function = registry.resolve_function(&ctx, &address).await.unwrap();
    let out = function
        .call(&ctx, FunctionData::new().with("a", 1.0).with("b", 2.0))
        .await
        .unwrap();
    assert_eq!(out.get_f64("result"), Some(3.0));

    let mock = registry.get_portal_for_scheme("mock").unwrap();
    let mock_address = mock.apply(&ctx, echo()).await.unwrap();
    assert!(!registry
        .resolve_function(&ctx, &mock_address)
        .await
        .unwrap()
        .is_remote());

    let unknown = Address::parse("ftp://files.example.com/f").unwrap();
    assert!(matches!(
        registry.resolve_function(&ctx, &unknown).await,
        Err(PortalError::UnsupportedScheme { .. })
    ));

    registry.start_all(&ctx).await.unwrap();
    for portal in registry.portals() {
        portal.health(&ctx).await.unwrap();
    }
    registry.stop_all(&ctx).await.unwrap();
}
