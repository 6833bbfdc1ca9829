//! Build-plan negotiation.
//!
//! Resolution walks the required names outward from the platform roots,
//! activates every passing module that provides something in that closure,
//! then checks the active set for conflicts, unsatisfied names and cycles.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::{debug, warn};

use super::types::*;

/// Resolve detect outcomes (in registration order) into a build plan.
///
/// The active set and every error are independent of registration order.
/// Order only decides the build order and which of two differing
/// non-exclusive provisions is canonical.
pub fn resolve(detections: &[Detection], platform: &PlatformConfig) -> Result<Resolution, PlanError> {
  let mut seen = BTreeSet::new();
  for detection in detections {
    if !seen.insert(detection.module.as_str()) {
      return Err(PlanError::DuplicateModule(detection.module.clone()));
    }
  }

  let mut warnings = Vec::new();

  // (registration index, module, contract) of every passing module
  let passing: Vec<(usize, &str, &Contract)> = detections
    .iter()
    .enumerate()
    .filter_map(|(i, d)| d.result.contract().map(|c| (i, d.module.as_str(), c)))
    .collect();

  let mut providers: BTreeMap<&str, Vec<(usize, &str, &Provide)>> = BTreeMap::new();
  for &(index, module, contract) in &passing {
    for provide in &contract.provides {
      providers.entry(provide.name.as_str()).or_default().push((index, module, provide));
    }
  }

  for module in &platform.always {
    if !passing.iter().any(|(_, m, _)| *m == module.as_str()) {
      warn!(module = %module, "forced module did not pass detection");
      warnings.push(PlanWarning::ForcedModuleSkipped { module: module.clone() });
    }
  }

  let closure = required_closure(&passing, &providers, platform);
  debug!(names = ?closure, "required closure");

  let active: Vec<(usize, &str, &Contract)> = passing
    .iter()
    .copied()
    .filter(|(_, module, contract)| {
      platform.is_always(module) || contract.provides.iter().any(|p| closure.contains(p.name.as_str()))
    })
    .collect();

  // Conflicts among providers of required names. All providers of a closure
  // name are active, so this sees the same set in any registration order.
  let mut canonical: BTreeMap<&str, (&str, &Provide)> = BTreeMap::new();
  for (name, candidates) in &providers {
    if !closure.contains(name) {
      continue;
    }
    if let Some((a, b)) = exclusive_conflict(candidates) {
      return Err(PlanError::ExclusiveConflict {
        name: name.to_string(),
        first: a.to_string(),
        second: b.to_string(),
      });
    }

    let (_, first_module, first) = candidates[0];
    for &(_, other_module, other) in &candidates[1..] {
      if other_module == first_module || other.metadata == first.metadata {
        continue;
      }
      warn!(name = %name, canonical = %first_module, other = %other_module, "conflicting provision");
      warnings.push(PlanWarning::ConflictingProvision {
        name: name.to_string(),
        canonical: first_module.to_string(),
        other: other_module.to_string(),
      });
    }
    canonical.insert(*name, (first_module, first));
  }

  // requests per name: (requester, metadata)
  let mut requests: BTreeMap<&str, Vec<Request>> = BTreeMap::new();
  for root in &platform.roots {
    requests.entry(root.as_str()).or_default().push(Request {
      requester: PLATFORM_REQUESTER.to_string(),
      metadata: Default::default(),
    });
  }
  for &(_, module, contract) in &active {
    for require in &contract.requires {
      requests.entry(require.name.as_str()).or_default().push(Request {
        requester: module.to_string(),
        metadata: require.metadata.clone(),
      });
    }
  }

  if let Some(name) = closure.iter().find(|name| !canonical.contains_key(*name)) {
    let requested_by = requests
      .get(name)
      .map(|reqs| {
        let mut by: Vec<String> = reqs.iter().map(|r| r.requester.clone()).collect();
        by.sort();
        by.dedup();
        by
      })
      .unwrap_or_default();
    return Err(PlanError::Unsatisfied {
      name: name.to_string(),
      requested_by,
    });
  }

  check_acyclic(&active, &canonical)?;

  let modules = active
    .iter()
    .map(|&(_, module, contract)| {
      let requires = contract
        .requires
        .iter()
        .filter_map(|require| {
          canonical.get(require.name.as_str()).map(|(provider, provide)| ResolvedRequire {
            name: require.name.clone(),
            metadata: require.metadata.clone(),
            provider: provider.to_string(),
            provided: provide.metadata.clone(),
          })
        })
        .collect();

      let provides = contract
        .provides
        .iter()
        .filter(|provide| closure.contains(provide.name.as_str()))
        .map(|provide| ProvidedEntry {
          name: provide.name.clone(),
          metadata: provide.metadata.clone(),
          canonical: canonical.get(provide.name.as_str()).is_some_and(|(m, _)| *m == module),
          requests: requests.get(provide.name.as_str()).cloned().unwrap_or_default(),
        })
        .collect();

      (module.to_string(), ModulePlan { requires, provides })
    })
    .collect();

  Ok(Resolution {
    plan: BuildPlan::new(modules),
    warnings,
  })
}

/// Smallest pair of modules (sorted by name) whose provisions differ while at
/// least one side is exclusive.
fn exclusive_conflict<'a>(candidates: &[(usize, &'a str, &Provide)]) -> Option<(&'a str, &'a str)> {
  let mut found: Option<(&'a str, &'a str)> = None;
  for (i, &(_, left_module, left)) in candidates.iter().enumerate() {
    for &(_, right_module, right) in &candidates[i + 1..] {
      if left_module == right_module || left.metadata == right.metadata || !(left.exclusive || right.exclusive) {
        continue;
      }
      let pair = if left_module < right_module {
        (left_module, right_module)
      } else {
        (right_module, left_module)
      };
      if found.is_none_or(|current| pair < current) {
        found = Some(pair);
      }
    }
  }
  found
}

/// Names transitively required starting from the platform roots and the
/// requirements of forced modules.
fn required_closure<'a>(
  passing: &[(usize, &'a str, &'a Contract)],
  providers: &BTreeMap<&'a str, Vec<(usize, &'a str, &'a Provide)>>,
  platform: &'a PlatformConfig,
) -> BTreeSet<&'a str> {
  let contracts: HashMap<&'a str, &'a Contract> = passing.iter().map(|&(_, m, c)| (m, c)).collect();

  let mut pending: Vec<&'a str> = platform.roots.iter().map(String::as_str).collect();
  for module in &platform.always {
    if let Some(&contract) = contracts.get(module.as_str()) {
      pending.extend(contract.requires.iter().map(|r| r.name.as_str()));
    }
  }

  let mut closure = BTreeSet::new();
  while let Some(name) = pending.pop() {
    if !closure.insert(name) {
      continue;
    }
    for &(_, module, _) in providers.get(name).map(Vec::as_slice).unwrap_or_default() {
      if let Some(&contract) = contracts.get(module) {
        pending.extend(contract.requires.iter().map(|r| r.name.as_str()));
      }
    }
  }
  closure
}

/// Reject cycles in the provider -> requirer graph of the active modules.
fn check_acyclic(active: &[(usize, &str, &Contract)], canonical: &BTreeMap<&str, (&str, &Provide)>) -> Result<(), PlanError> {
  let mut graph: DiGraph<&str, ()> = DiGraph::new();
  let nodes: HashMap<&str, NodeIndex> = active.iter().map(|&(_, m, _)| (m, graph.add_node(m))).collect();

  for &(_, module, contract) in active {
    for require in &contract.requires {
      let Some((provider, _)) = canonical.get(require.name.as_str()) else {
        continue;
      };
      if *provider == module {
        continue;
      }
      if let (Some(&from), Some(&to)) = (nodes.get(provider), nodes.get(module)) {
        graph.update_edge(from, to, ());
      }
    }
  }

  if toposort(&graph, None).is_ok() {
    return Ok(());
  }

  let mut members: Vec<String> = tarjan_scc(&graph)
    .into_iter()
    .filter(|scc| scc.len() > 1)
    .flat_map(|scc| scc.into_iter().map(|idx| graph[idx].to_string()))
    .collect();
  members.sort();
  Err(PlanError::Cycle { modules: members })
}
