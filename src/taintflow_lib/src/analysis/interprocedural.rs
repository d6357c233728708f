//! The global fixpoint over all method models.
//!
//! Every round analyzes a set of methods against a snapshot of the model
//! registry, distributed over worker threads by the [`Scheduler`]. A method
//! whose model grew schedules its dependents for the next round; the rounds
//! iterate until no model changes or the round cap is hit.

use std::collections::BTreeSet;

use crate::analysis::call_graph::{CallGraph, Overrides};
use crate::analysis::dependencies::Dependencies;
use crate::analysis::scheduler::Scheduler;
use crate::analysis::taint::{backward, forward, MethodContext};
use crate::context::Context;
use crate::intermediate_representation::{MethodId, Position, PositionId};
use crate::model::{Model, Registry, Rules};
use crate::prelude::*;

/// Computes the final model of every method of the program.
///
/// The registry provides the starting models, i.e. the user-declared and
/// default models. The returned registry holds the converged models with
/// all inferred generations, sinks, propagations and issues.
pub fn run(
    context: &mut Context,
    rules: &Rules,
    mut registry: Registry,
) -> Result<Registry, Error> {
    let unknown_position = context.positions.intern(Position::unknown());
    let context = &*context;

    let overrides = Overrides::new(context);
    let call_graph = CallGraph::new(context, &overrides);

    let mut queue: BTreeSet<MethodId> = context
        .methods
        .iter()
        .filter(|(method, definition)| {
            definition.body.is_some() && !registry.get(*method).skip_analysis()
        })
        .map(|(method, _)| method)
        .collect();

    let mut round = 0;
    while !queue.is_empty() {
        if round >= context.heuristics.max_number_global_iterations {
            return Err(anyhow!(
                "the model computation did not converge within {} rounds",
                context.heuristics.max_number_global_iterations
            ));
        }
        round += 1;

        let snapshot = registry.clone();
        let dependencies = Dependencies::new(context, &call_graph, &snapshot);
        let scheduler = Scheduler::new(&queue, &dependencies, context.options.number_of_workers);

        let results: Vec<(MethodId, Result<Model, Error>)> =
            if context.options.sequential || context.options.number_of_workers <= 1 {
                scheduler
                    .queues()
                    .iter()
                    .flatten()
                    .map(|&method| {
                        (
                            method,
                            analyze_method(
                                context,
                                rules,
                                &call_graph,
                                &snapshot,
                                method,
                                unknown_position,
                            ),
                        )
                    })
                    .collect()
            } else {
                let (sender, receiver) = crossbeam_channel::unbounded();
                std::thread::scope(|scope| {
                    for worker_queue in scheduler.queues() {
                        let sender = sender.clone();
                        let snapshot = &snapshot;
                        let call_graph = &call_graph;
                        scope.spawn(move || {
                            for &method in worker_queue {
                                let result = analyze_method(
                                    context,
                                    rules,
                                    call_graph,
                                    snapshot,
                                    method,
                                    unknown_position,
                                );
                                if sender.send((method, result)).is_err() {
                                    return;
                                }
                            }
                        });
                    }
                    drop(sender);
                    receiver.iter().collect()
                })
            };

        let analyzed = results.len();
        let mut changed = 0usize;
        let mut next_queue = BTreeSet::new();
        for (method, result) in results {
            let model = result?;
            if !model.leq(registry.get(method)) {
                changed += 1;
                next_queue.extend(dependencies.dependencies(method).iter().copied());
                // A grown model can keep growing through its own call sites.
                if call_graph.callees(method).next().is_some() {
                    next_queue.insert(method);
                }
            }
            registry.set(method, model);
        }
        log::info!("Global fixpoint round {round}: analyzed {analyzed} methods, {changed} changed");
        queue = next_queue;
    }
    Ok(registry)
}

/// Analyzes one method against the registry snapshot and returns its
/// updated model.
fn analyze_method(
    context: &Context,
    rules: &Rules,
    call_graph: &CallGraph,
    registry: &Registry,
    method: MethodId,
    unknown_position: PositionId,
) -> Result<Model, Error> {
    log::debug!("Analyzing {:?}", method);
    let method_context = MethodContext::new(
        context,
        rules,
        call_graph,
        registry,
        method,
        unknown_position,
    )?;
    let mut model = registry.get(method).clone();
    forward::run(&method_context, &mut model)?;
    backward::run(&method_context, &mut model)?;
    model.approximate(context);
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Heuristics, Options};
    use crate::intermediate_representation::{
        AccessPath, Instruction, Method, MethodBody, Register, Root,
    };
    use crate::taint::{Frame, TaintConfig};

    #[test]
    fn source_models_converge_across_calls() {
        let options = Options {
            sequential: true,
            ..Options::default()
        };
        let mut context = Context::new(options, Heuristics::default());
        let class = context.type_named("LData;");
        let source_name = context.strings.intern("source");
        let source_method = context.methods.add(Method::new(
            class,
            source_name,
            vec![],
            Some(class),
            true,
            Some(MethodBody::linear(vec![Instruction::Return { src: None }])),
        ));
        let caller_name = context.strings.intern("caller");
        let caller = context.methods.add(Method::new(
            class,
            caller_name,
            vec![],
            Some(class),
            true,
            Some(MethodBody::linear(vec![
                Instruction::Invoke {
                    arguments: vec![],
                    method: source_method,
                    is_virtual: false,
                    dest: Some(Register(0)),
                },
                Instruction::Return {
                    src: Some(Register(0)),
                },
            ])),
        ));

        let rules = Rules::new();
        let overrides = Overrides::new(&context);
        let mut registry =
            Registry::with_default_models(&context, |method| overrides.get(method).len());
        let kind = context.kinds.named("UserInput");
        let mut source_model = registry.get(source_method).clone();
        source_model.add_generation(
            &context,
            AccessPath::from_root(Root::Return),
            Frame::from_config(TaintConfig::new(kind, AccessPath::from_root(Root::Return))),
        );
        registry.set(source_method, source_model);

        let registry = run(&mut context, &rules, registry).unwrap();

        // The caller returns the source's taint, one call away.
        let generations = registry
            .get(caller)
            .generations()
            .read(&AccessPath::from_root(Root::Return));
        assert!(!generations.is_bottom());
        let frame = generations.root().frames().next().unwrap();
        assert_eq!(frame.kind(), kind);
        assert_eq!(frame.callee(), Some(source_method));
        assert_eq!(frame.distance(), 1);
        assert_eq!(frame.callee_port(), &AccessPath::from_root(Root::Return));
        assert!(frame.call_kind().is_callsite());

        // A second run starting from the converged registry is a fixpoint.
        let converged = run(&mut context, &rules, registry.clone()).unwrap();
        assert!(converged.get(caller).leq(registry.get(caller)));
        assert!(registry.get(caller).leq(converged.get(caller)));
    }

    #[test]
    fn identity_chains_keep_the_propagation_local() {
        let options = Options {
            sequential: true,
            ..Options::default()
        };
        let mut context = Context::new(options, Heuristics::default());
        let class = context.type_named("LData;");
        let inner_name = context.strings.intern("inner");
        let inner = context.methods.add(Method::new(
            class,
            inner_name,
            vec![class],
            Some(class),
            true,
            Some(MethodBody::linear(vec![
                Instruction::LoadParam {
                    parameter: 0,
                    dest: Register(0),
                },
                Instruction::Return {
                    src: Some(Register(0)),
                },
            ])),
        ));
        let outer_name = context.strings.intern("outer");
        let outer = context.methods.add(Method::new(
            class,
            outer_name,
            vec![class],
            Some(class),
            true,
            Some(MethodBody::linear(vec![
                Instruction::LoadParam {
                    parameter: 0,
                    dest: Register(0),
                },
                Instruction::Invoke {
                    arguments: vec![Register(0)],
                    method: inner,
                    is_virtual: false,
                    dest: Some(Register(1)),
                },
                Instruction::Return {
                    src: Some(Register(1)),
                },
            ])),
        ));

        let rules = Rules::new();
        let overrides = Overrides::new(&context);
        let registry =
            Registry::with_default_models(&context, |method| overrides.get(method).len());

        let registry = run(&mut context, &rules, registry).unwrap();

        // Both methods pass their argument through to the return value.
        for method in [inner, outer] {
            let propagations = registry
                .get(method)
                .propagations()
                .read(&AccessPath::from_root(Root::Argument(0)));
            assert!(!propagations.is_bottom());
            let frame = propagations.root().frames().next().unwrap();
            assert_eq!(frame.kind(), context.kinds.local_return());
        }
    }
}
