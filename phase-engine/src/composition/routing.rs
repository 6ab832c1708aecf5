// Routing Phase Builder
// N:N phases that republish named input routes onto named output routes

use crate::phase::{Arity, Implementation, Phase, PhaseInfo, PhaseRuntime, Router};
use crate::types::{DataType, PortSpec};

use std::collections::HashSet;

/// Tag key selecting a routing phase's input port
pub const ROUTE_IN_KEY: &str = "eto";

/// Tag key written on a routing phase's output port
pub const ROUTE_OUT_KEY: &str = "efrom";

/// Build an N:N phase from route groups.
///
/// Route `i` reads every port named in `in_routes[i]` and copies each item
/// to every port named in `out_routes[i]`. All ports of one route share a
/// fresh type variable.
///
/// # Panics
///
/// Panics when the two lists differ in length, or when a name repeats on
/// the same side.
pub fn routing_phase<S: AsRef<str>>(in_routes: &[Vec<S>], out_routes: &[Vec<S>]) -> Phase {
    assert_eq!(
        in_routes.len(),
        out_routes.len(),
        "routing needs as many output routes as input routes"
    );
    assert_unique("input", in_routes);
    assert_unique("output", out_routes);

    let mut inputs = Vec::new();
    let mut outputs = Vec::new();
    let mut routes = Vec::new();

    for (ins, outs) in in_routes.iter().zip(out_routes) {
        let ty = DataType::fresh();
        let ins: Vec<String> = ins.iter().map(|name| name.as_ref().to_string()).collect();
        let outs: Vec<String> = outs.iter().map(|name| name.as_ref().to_string()).collect();

        inputs.extend(
            ins.iter()
                .map(|name| PortSpec::named(name.as_str(), ROUTE_IN_KEY, ty.clone())),
        );
        outputs.extend(
            outs.iter()
                .map(|name| PortSpec::named(name.as_str(), ROUTE_OUT_KEY, ty.clone())),
        );
        routes.push(Route {
            inputs: ins,
            outputs: outs,
        });
    }

    let info = PhaseInfo::new("routing", Arity::ManyToMany)
        .with_inputs(inputs)
        .with_outputs(outputs);
    Phase::new(info, Implementation::router(RouteTable { routes }))
}

fn assert_unique<S: AsRef<str>>(side: &str, routes: &[Vec<S>]) {
    let mut seen = HashSet::new();
    for name in routes.iter().flatten() {
        assert!(
            seen.insert(name.as_ref()),
            "{} route '{}' is declared twice",
            side,
            name.as_ref()
        );
    }
}

#[derive(Debug)]
struct Route {
    inputs: Vec<String>,
    outputs: Vec<String>,
}

#[derive(Debug)]
struct RouteTable {
    routes: Vec<Route>,
}

impl Router for RouteTable {
    fn route(&self, runtime: &mut PhaseRuntime) -> anyhow::Result<()> {
        for route in &self.routes {
            for input in &route.inputs {
                runtime.each_input(input, |runtime, data| {
                    for output in &route.outputs {
                        runtime.put_to(output, data.clone())?;
                    }
                    Ok(())
                })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::{Command, PortLayout};
    use crate::stream::{Selector, Stream, TagLedger, TagValue};
    use serde_json::json;

    fn to(port: &str) -> TagLedger {
        TagLedger::new().with(ROUTE_IN_KEY, port).with("origin", port)
    }

    #[test]
    fn test_merge_two_inputs_into_one_output() {
        let mut routing = routing_phase(&[vec!["a", "b"]], &[vec!["c"]]);
        let stream = Stream::new();
        stream.put(json!(1), to("a"));
        stream.put(json!(2), to("b"));
        stream.put(json!(3), to("z"));

        let Command::Done(out) = routing.execute(stream).unwrap() else {
            panic!("expected done");
        };

        let routed = out.get(&Selector::exact(ROUTE_OUT_KEY, "c"));
        assert_eq!(routed.len(), 2);
        assert_eq!(routed[0].data, json!(1));
        assert_eq!(routed[0].tags.read("origin"), Some(&TagValue::text("a")));
        assert_eq!(routed[1].data, json!(2));
        // the unrouted item is left for someone else
        assert_eq!(out.values(), vec![json!(3)]);
    }

    #[test]
    fn test_fan_out_to_every_output_of_the_route() {
        let mut routing = routing_phase(&[vec!["a"], vec!["b"]], &[vec!["x", "y"], vec!["z"]]);
        let stream = Stream::new();
        stream.put(json!("from-a"), to("a"));
        stream.put(json!("from-b"), to("b"));

        let Command::Done(out) = routing.execute(stream).unwrap() else {
            panic!("expected done");
        };

        assert_eq!(out.get(&Selector::exact(ROUTE_OUT_KEY, "x")).len(), 1);
        assert_eq!(out.get(&Selector::exact(ROUTE_OUT_KEY, "y")).len(), 1);
        let z = out.get(&Selector::exact(ROUTE_OUT_KEY, "z"));
        assert_eq!(z.len(), 1);
        assert_eq!(z[0].data, json!("from-b"));
    }

    #[test]
    fn test_routes_share_a_type_variable() {
        let routing = routing_phase(&[vec!["a", "b"], vec!["c"]], &[vec!["d"], vec!["e"]]);

        let (PortLayout::Named(inputs), PortLayout::Named(outputs)) =
            (routing.input_layout(), routing.output_layout())
        else {
            panic!("routing phases use named ports");
        };

        assert_eq!(inputs[0].data_type, inputs[1].data_type);
        assert_eq!(inputs[0].data_type, outputs[0].data_type);
        assert_ne!(inputs[0].data_type, inputs[2].data_type);
        assert_eq!(inputs[2].data_type, outputs[1].data_type);
        assert_eq!(inputs[0].key, ROUTE_IN_KEY);
        assert_eq!(outputs[0].key, ROUTE_OUT_KEY);
    }

    #[test]
    #[should_panic(expected = "as many output routes")]
    fn test_length_mismatch_panics() {
        let _ = routing_phase(&[vec!["a"], vec!["b"]], &[vec!["c"]]);
    }

    #[test]
    #[should_panic(expected = "declared twice")]
    fn test_duplicate_route_name_panics() {
        let _ = routing_phase(&[vec!["a"], vec!["a"]], &[vec!["c"], vec!["d"]]);
    }
}
