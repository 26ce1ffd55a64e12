//! Work distribution strategies.

use lucent_interface::LoadBalancer;

/// Hands each worker one contiguous run of work units. Good cache locality
/// when neighbouring units touch neighbouring memory.
#[derive(Debug, Default)]
pub struct ContiguousLoadBalancer;

impl LoadBalancer for ContiguousLoadBalancer {
    fn for_each_assignment(
        &self,
        proc: usize,
        num_procs: usize,
        total: usize,
        visit: &mut dyn FnMut(usize),
    ) {
        // The first `total % num_procs` workers take one extra unit.
        let base = total / num_procs;
        let extra = total % num_procs;
        let begin = proc * base + proc.min(extra);
        let len = base + usize::from(proc < extra);
        for unit in begin..begin + len {
            visit(unit);
        }
    }
}

/// Deals work units round-robin. Evens out cost when unit expense varies
/// across the image.
#[derive(Debug, Default)]
pub struct CyclicLoadBalancer;

impl LoadBalancer for CyclicLoadBalancer {
    fn for_each_assignment(
        &self,
        proc: usize,
        num_procs: usize,
        total: usize,
        visit: &mut dyn FnMut(usize),
    ) {
        let mut unit = proc;
        while unit < total {
            visit(unit);
            unit += num_procs;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignments(balancer: &dyn LoadBalancer, num_procs: usize, total: usize) -> Vec<Vec<usize>> {
        (0..num_procs)
            .map(|proc| {
                let mut units = Vec::new();
                balancer.for_each_assignment(proc, num_procs, total, &mut |unit| units.push(unit));
                units
            })
            .collect()
    }

    fn assert_partitions(balancer: &dyn LoadBalancer) {
        for num_procs in 1..=5 {
            for total in [0, 1, 7, 16, 31] {
                let per_proc = assignments(balancer, num_procs, total);
                let mut seen = vec![false; total];
                for units in &per_proc {
                    for &unit in units {
                        assert!(!seen[unit], "unit {unit} visited twice");
                        seen[unit] = true;
                    }
                }
                assert!(seen.iter().all(|v| *v), "some unit never visited");
            }
        }
    }

    #[test]
    fn contiguous_visits_every_unit_exactly_once() {
        assert_partitions(&ContiguousLoadBalancer);
    }

    #[test]
    fn cyclic_visits_every_unit_exactly_once() {
        assert_partitions(&CyclicLoadBalancer);
    }

    #[test]
    fn contiguous_runs_are_contiguous_and_balanced() {
        let per_proc = assignments(&ContiguousLoadBalancer, 3, 8);
        assert_eq!(per_proc, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6, 7]]);
    }

    #[test]
    fn cyclic_strides_by_worker_count() {
        let per_proc = assignments(&CyclicLoadBalancer, 3, 8);
        assert_eq!(per_proc, vec![vec![0, 3, 6], vec![1, 4, 7], vec![2, 5]]);
    }
}
