//! Small graphs shared by the analysis tests.

use crate::graph::{ComputationGraph, OpDef, ValueId};
use std::collections::HashMap;

pub struct Fixture {
    pub graph: ComputationGraph,
    pub values: HashMap<&'static str, ValueId>,
}

impl Fixture {
    pub fn id(&self, name: &str) -> ValueId {
        *self.values.get(name).unwrap_or_else(|| panic!("fixture has no value `{}`", name))
    }
}

/// y = x + 1
pub fn y_function_of_x() -> Fixture {
    let mut g = ComputationGraph::new();
    let x = g.add_placeholder("x");
    let one = g.add_constant("Const", 1i64);
    let y = g.apply("add", OpDef::new("Add"), &[x, one]).unwrap();
    Fixture { graph: g, values: HashMap::from([("x", x), ("y", y)]) }
}

/// y = x + 1, z = x2 + 2, with an input nothing reads.
pub fn y_function_of_x_with_unused_inputs() -> Fixture {
    let mut g = ComputationGraph::new();
    let x = g.add_placeholder("x");
    let x2 = g.add_placeholder("x2");
    let x_unused = g.add_placeholder("x_unused");
    let one = g.add_constant("Const", 1i64);
    let two = g.add_constant("Const", 2i64);
    let y = g.apply("add", OpDef::new("Add"), &[x, one]).unwrap();
    let z = g.apply("add", OpDef::new("Add"), &[x2, two]).unwrap();
    Fixture {
        graph: g,
        values: HashMap::from([("x", x), ("x2", x2), ("x_unused", x_unused), ("y", y), ("z", z)]),
    }
}

/// y = lookup(table, x), the table being initialized from `filename`.
pub fn y_function_of_x_and_table() -> Fixture {
    let mut g = ComputationGraph::new();
    let filename = g.add_placeholder("filename");
    let table = g
        .add_operation("hash_table", OpDef::new("HashTable").resource(), &[])
        .unwrap();
    g.add_initializer("table_init", table, &[filename]).unwrap();
    let handle = g.output(table, 0).unwrap();
    let x = g.add_placeholder("x");
    let default = g.add_constant("Const", -1i64);
    let y = g
        .apply("lookup", OpDef::new("LookupTableFind"), &[handle, x, default])
        .unwrap();
    Fixture {
        graph: g,
        values: HashMap::from([("filename", filename), ("x", x), ("y", y), ("table", handle)]),
    }
}

pub fn y_function_of_x_and_untracked_table() -> Fixture {
    let mut fixture = y_function_of_x_and_table();
    fixture.graph.untrack_all_initializers();
    fixture
}

/// The second table is initialized from a lookup into the first one.
pub fn table_initialized_by_table_output() -> Fixture {
    let mut g = ComputationGraph::new();
    let filename = g.add_placeholder("filename");
    let table1 = g
        .add_operation("hash_table", OpDef::new("HashTable").resource(), &[])
        .unwrap();
    g.add_initializer("table_init", table1, &[filename]).unwrap();
    let handle1 = g.output(table1, 0).unwrap();
    let keys = g.add_constant("Const", "a,b,c");
    let default = g.add_constant("Const", -1i64);
    let ids = g
        .apply("lookup", OpDef::new("LookupTableFind"), &[handle1, keys, default])
        .unwrap();
    let as_string = g.apply("as_string", OpDef::new("AsString"), &[ids]).unwrap();
    let range = g.add_constant("Const", "0..3");

    let table2 = g
        .add_operation("hash_table", OpDef::new("HashTable").resource(), &[])
        .unwrap();
    g.add_initializer("table_init", table2, &[as_string, range]).unwrap();
    let handle2 = g.output(table2, 0).unwrap();
    let x = g.add_placeholder("x");
    let y = g
        .apply("lookup", OpDef::new("LookupTableFind"), &[handle2, x, default])
        .unwrap();
    Fixture {
        graph: g,
        values: HashMap::from([("filename", filename), ("x", x), ("y", y), ("as_string", as_string)]),
    }
}

/// z = assert_equal(x, y)
pub fn z_asserts_x_equals_y() -> Fixture {
    let mut g = ComputationGraph::new();
    let x = g.add_placeholder("x");
    let y = g.add_placeholder("y");
    let z = g.apply("assert_equal", OpDef::new("AssertEqual"), &[x, y]).unwrap();
    Fixture { graph: g, values: HashMap::from([("x", x), ("y", y), ("z", z)]) }
}
