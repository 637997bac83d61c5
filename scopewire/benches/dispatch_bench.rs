//! Benchmarks for wire dispatch.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use scopewire::prelude::*;
use scopewire::testing::{RecordingComponent, ShutdownLog};
use serde_json::json;

fn greeter(scope: Scope, log: &ShutdownLog) -> ComponentDefinition {
    let log = log.clone();
    ComponentDefinition::new(
        "Greeter",
        scope,
        ServiceContract::new("Greeter").with_operation(Operation::new("greet")),
        move |_| Ok(Arc::new(RecordingComponent::new("Greeter", log.clone())) as Arc<dyn Component>),
    )
}

fn dispatch_benchmark(c: &mut Criterion) {
    let Ok(rt) = tokio::runtime::Runtime::new() else {
        return;
    };
    let log = ShutdownLog::new();

    let registry = rt.block_on(async {
        let registry = CompositeRegistry::builder("bench").build()?;
        registry.register_component(greeter(Scope::Module, &log)).await?;
        registry.start().await?;
        Ok::<_, RuntimeError>(registry)
    });
    let Ok(registry) = registry else {
        return;
    };

    let Ok(direct) = registry.get_service("direct", "Greeter") else {
        return;
    };
    registry.add_policy_interceptor(Arc::new(MonitorInterceptor::default()));
    let Ok(monitored) = registry.get_service("monitored", "Greeter") else {
        return;
    };

    let work = WorkContext::new();
    c.bench_function("optimized_module_dispatch", |b| {
        b.iter(|| rt.block_on(direct.invoke("greet", black_box(json!({})), &work)))
    });
    c.bench_function("monitored_module_dispatch", |b| {
        b.iter(|| rt.block_on(monitored.invoke("greet", black_box(json!({})), &work)))
    });
    log.clear();
}

criterion_group!(benches, dispatch_benchmark);
criterion_main!(benches);
