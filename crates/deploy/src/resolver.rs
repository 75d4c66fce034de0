//! Dependency resolution for a batch of deployment intents.
//!
//! Intents reference each other through constructor arguments. Resolution
//! builds the reference graph, orders it topologically (dependencies first,
//! ties broken by batch order) and substitutes every reference with the
//! derived value of an already-resolved intent.

use std::collections::{BTreeSet, HashMap};

use alloy_core::primitives::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    address::{AddressComputer, ComputedDeploymentParams, parse_salt},
    error::DeployError,
    intent::{ConstructorArg, DeploymentIntent, DerivedField},
};

/// An intent with every reference substituted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDeploymentParams {
    pub id: String,
    pub salt: String,
    pub constructor_args: Vec<Value>,
    pub init_code: Bytes,
}

/// A resolved intent together with its computed parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDeployment {
    pub params: ResolvedDeploymentParams,
    pub computed: ComputedDeploymentParams,
}

/// Result of resolving a batch.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Ids in the order they were resolved (dependencies first).
    pub order: Vec<String>,
    /// One entry per intent, in the original batch order.
    pub deployments: Vec<ResolvedDeployment>,
}

impl Resolution {
    /// Look up a deployment by id.
    pub fn get(&self, id: &str) -> Option<&ResolvedDeployment> {
        self.deployments.iter().find(|d| d.params.id == id)
    }

    /// Deployments in resolution order.
    pub fn in_order(&self) -> impl Iterator<Item = &ResolvedDeployment> {
        self.order.iter().filter_map(|id| self.get(id))
    }
}

/// Explicit adjacency view of a batch: node index -> indices it depends on.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    ids: Vec<String>,
    deps: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Build the graph, validating ids and references.
    pub fn build(intents: &[DeploymentIntent]) -> Result<Self, DeployError> {
        let mut index_by_id = HashMap::with_capacity(intents.len());
        for (i, intent) in intents.iter().enumerate() {
            if index_by_id.insert(intent.id.as_str(), i).is_some() {
                return Err(DeployError::invalid_input(format!(
                    "Duplicate deployment id '{}'",
                    intent.id
                )));
            }
        }

        let mut deps = Vec::with_capacity(intents.len());
        for intent in intents {
            let mut node_deps = Vec::new();
            for arg in &intent.constructor_args {
                let ConstructorArg::Reference { id, field } = arg else {
                    continue;
                };
                let target = *index_by_id.get(id.as_str()).ok_or_else(|| {
                    DeployError::UnresolvedReference {
                        id: id.clone(),
                        field: *field,
                    }
                })?;
                if !node_deps.contains(&target) {
                    node_deps.push(target);
                }
            }
            deps.push(node_deps);
        }

        Ok(Self {
            ids: intents.iter().map(|i| i.id.clone()).collect(),
            deps,
        })
    }

    /// Ids of the direct dependencies of `id`.
    pub fn dependencies_of(&self, id: &str) -> Vec<&str> {
        self.ids
            .iter()
            .position(|node| node == id)
            .map(|i| self.deps[i].iter().map(|d| self.ids[*d].as_str()).collect())
            .unwrap_or_default()
    }

    /// Topological order, dependencies first, lowest batch index first among ready nodes.
    pub fn topological_order(&self) -> Result<Vec<usize>, DeployError> {
        let n = self.ids.len();
        let mut remaining_deps: Vec<usize> = self.deps.iter().map(Vec::len).collect();
        let mut dependents = vec![Vec::new(); n];
        for (node, node_deps) in self.deps.iter().enumerate() {
            for dep in node_deps {
                dependents[*dep].push(node);
            }
        }

        let mut ready: BTreeSet<usize> = (0..n).filter(|i| remaining_deps[*i] == 0).collect();
        let mut order = Vec::with_capacity(n);

        while let Some(node) = ready.pop_first() {
            order.push(node);
            for dependent in &dependents[node] {
                remaining_deps[*dependent] -= 1;
                if remaining_deps[*dependent] == 0 {
                    ready.insert(*dependent);
                }
            }
        }

        if order.len() < n {
            return Err(DeployError::CycleDetected {
                path: self.find_cycle(&remaining_deps),
            });
        }

        Ok(order)
    }

    /// Walk dependency edges among unprocessed nodes until a node repeats.
    ///
    /// Every node left over by Kahn's algorithm has at least one unprocessed
    /// dependency, so the walk always closes a cycle.
    fn find_cycle(&self, remaining_deps: &[usize]) -> Vec<String> {
        let Some(start) = (0..self.ids.len()).find(|i| remaining_deps[*i] > 0) else {
            return Vec::new();
        };

        let mut path = vec![start];
        let mut current = start;
        loop {
            let Some(next) = self.deps[current]
                .iter()
                .copied()
                .find(|d| remaining_deps[*d] > 0)
            else {
                break;
            };

            if let Some(pos) = path.iter().position(|n| *n == next) {
                let mut cycle: Vec<String> =
                    path[pos..].iter().map(|i| self.ids[*i].clone()).collect();
                cycle.push(self.ids[next].clone());
                return cycle;
            }

            path.push(next);
            current = next;
        }

        path.into_iter().map(|i| self.ids[i].clone()).collect()
    }
}

/// Resolve a batch of intents.
///
/// All-or-nothing: on error no partial result is returned and no address has
/// been handed out.
pub fn resolve(intents: &[DeploymentIntent], computer: &AddressComputer) -> Result<Resolution, DeployError> {
    let graph = DependencyGraph::build(intents)?;
    let order = graph.topological_order()?;

    let mut computed_by_id: HashMap<&str, ComputedDeploymentParams> = HashMap::with_capacity(intents.len());
    let mut resolved_by_index: Vec<Option<ResolvedDeployment>> = vec![None; intents.len()];

    for index in &order {
        let intent = &intents[*index];

        let constructor_args = intent
            .constructor_args
            .iter()
            .map(|arg| match arg {
                ConstructorArg::Value { value } => Ok(value.clone()),
                ConstructorArg::Reference { id, field } => computed_by_id
                    .get(id.as_str())
                    .map(|computed| derived_value(computed, *field))
                    .ok_or_else(|| DeployError::UnresolvedReference {
                        id: id.clone(),
                        field: *field,
                    }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let init_code = intent.artifact.init_code(&constructor_args).map_err(|e| match e {
            DeployError::InvalidInput(msg) => {
                DeployError::InvalidInput(format!("{}: {}", intent.id, msg))
            }
            other => other,
        })?;
        let raw_salt = parse_salt(&intent.salt)?;
        let computed = computer.compute(init_code.clone(), raw_salt)?;

        tracing::debug!(
            id = %intent.id,
            address = %computed.deterministic_address,
            "Resolved deployment"
        );

        computed_by_id.insert(intent.id.as_str(), computed.clone());
        resolved_by_index[*index] = Some(ResolvedDeployment {
            params: ResolvedDeploymentParams {
                id: intent.id.clone(),
                salt: intent.salt.clone(),
                constructor_args,
                init_code,
            },
            computed,
        });
    }

    Ok(Resolution {
        order: order.iter().map(|i| intents[*i].id.clone()).collect(),
        deployments: resolved_by_index.into_iter().flatten().collect(),
    })
}

/// Value substituted for a reference to `field`.
fn derived_value(computed: &ComputedDeploymentParams, field: DerivedField) -> Value {
    match field {
        DerivedField::Address => Value::String(computed.deterministic_address.to_string()),
    }
}
