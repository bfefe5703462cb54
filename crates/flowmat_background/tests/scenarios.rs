use std::collections::HashMap;

use flowmat_archive::{Archive, Direction, Flow, Process, Quantity};
use flowmat_background::{
    BackgroundManager, Fragment, MultiTermStrategy, PfIndex, TermRef, TraversalOptions,
};

fn flow(uuid: &str, name: &str, compartment: &[&str]) -> Flow {
    Flow {
        uuid: uuid.to_string(),
        name: name.to_string(),
        compartment: compartment.iter().map(|s| s.to_string()).collect(),
        characterizations: HashMap::new(),
    }
}

fn manager(archive: Archive) -> BackgroundManager {
    let mut mgr = BackgroundManager::new(archive, TraversalOptions::default()).unwrap();
    mgr.add_all_ref_products().unwrap();
    mgr
}

/// One process, one reference output, one unterminated emission.
#[test]
fn singleton_foreground_without_background() {
    let mut a = Archive::new("singleton");
    let f_ref = a.add_flow(flow("f-ref", "widget", &[])).unwrap();
    let f_em = a.add_flow(flow("f-em", "dust", &["air"])).unwrap();
    let mut p = Process::new("p", "widget maker");
    p.add_reference(f_ref, Direction::Output, Some(1.0));
    p.add_exchange(f_em, Direction::Output, Some(2.0), None);
    let pid = a.add_process(p).unwrap();

    let mgr = manager(a);
    assert_eq!(mgr.ndim(), 0);
    assert!(mgr.a_matrix().is_none());
    assert!(mgr.b_matrix().is_none());

    let pf = mgr.find_product_flow(f_ref, pid).unwrap();
    let frag = Fragment::new(&mgr, pf).unwrap();
    assert_eq!(frag.pdim(), 1);
    assert_eq!(frag.af().dim.nrows, 1);
    assert_eq!(frag.af().nnz(), 0);
    assert_eq!(frag.ad().dim.nrows, 0);
    assert_eq!(frag.bf().get(0, 0), 2.0);

    let em = &frag.emissions()[0];
    assert_eq!(em.flow, f_em);
    assert_eq!(em.direction, Direction::Output);
}

/// P1 consumes F2 from P2 and vice versa: one SCC of size 2, direction-
/// adjusted off-diagonal coefficients, empty B* and empty foreground.
#[test]
fn two_node_cycle_is_the_background() {
    let mut a = Archive::new("cycle");
    let f1 = a.add_flow(flow("f1", "f1", &[])).unwrap();
    let f2 = a.add_flow(flow("f2", "f2", &[])).unwrap();
    let mut p1 = Process::new("p1", "p1");
    p1.add_reference(f1, Direction::Output, Some(1.0));
    p1.add_exchange(f2, Direction::Input, Some(3.0), None);
    let p1 = a.add_process(p1).unwrap();
    let mut p2 = Process::new("p2", "p2");
    p2.add_reference(f2, Direction::Output, Some(1.0));
    p2.add_exchange(f1, Direction::Input, Some(2.0), None);
    let p2 = a.add_process(p2).unwrap();

    let mgr = manager(a);
    assert_eq!(mgr.ndim(), 2);

    let pf1 = mgr.find_product_flow(f1, p1).unwrap();
    let pf2 = mgr.find_product_flow(f2, p2).unwrap();
    assert!(mgr.is_background(pf1));
    assert!(mgr.is_background(pf2));
    assert_eq!(mgr.tarjan().scc_id(pf1), mgr.tarjan().scc_id(pf2));

    let a_star = mgr.a_matrix().unwrap();
    let c1 = mgr.tarjan().bg_dict(pf1).unwrap();
    let c2 = mgr.tarjan().bg_dict(pf2).unwrap();
    assert_eq!(a_star.get(c2, c1), 3.0);
    assert_eq!(a_star.get(c1, c2), 2.0);
    assert_eq!(mgr.b_matrix().unwrap().nnz(), 0);
    assert_eq!(mgr.product_flows(None, false).count(), 0);
}

/// A third process drawing on the cycle stays in the foreground; its
/// fragment's Ad column carries the draw at the right background row.
#[test]
fn foreground_over_background() {
    let mut a = Archive::new("fg over bg");
    let f1 = a.add_flow(flow("f1", "f1", &[])).unwrap();
    let f2 = a.add_flow(flow("f2", "f2", &[])).unwrap();
    let f3 = a.add_flow(flow("f3", "f3", &[])).unwrap();
    let mut p1 = Process::new("p1", "p1");
    p1.add_reference(f1, Direction::Output, Some(1.0));
    p1.add_exchange(f2, Direction::Input, Some(3.0), None);
    let p1 = a.add_process(p1).unwrap();
    let mut p2 = Process::new("p2", "p2");
    p2.add_reference(f2, Direction::Output, Some(1.0));
    p2.add_exchange(f1, Direction::Input, Some(2.0), None);
    a.add_process(p2).unwrap();
    let mut p3 = Process::new("p3", "p3");
    p3.add_reference(f3, Direction::Output, Some(1.0));
    p3.add_exchange(f1, Direction::Input, Some(5.0), None);
    let p3 = a.add_process(p3).unwrap();

    let mgr = manager(a);
    let pf3 = mgr.find_product_flow(f3, p3).unwrap();
    assert!(!mgr.is_background(pf3));
    assert_eq!(mgr.foreground(pf3), vec![pf3]);

    let frag = Fragment::new(&mgr, pf3).unwrap();
    assert_eq!(frag.pdim(), 1);
    assert_eq!(frag.af().nnz(), 0);

    let pf1 = mgr.find_product_flow(f1, p1).unwrap();
    let row = mgr.tarjan().bg_dict(pf1).unwrap();
    assert_eq!(frag.ad().get(row, 0), 5.0);
    assert_eq!(frag.ad().nnz(), 1);
}

/// A process consuming its own reference flow folds the value into the
/// inbound magnitude instead of emitting a matrix entry; entries recorded
/// against it normalize by the adjusted magnitude.
#[test]
fn self_dependency_is_absorbed() {
    let mut a = Archive::new("self loop");
    let f_ref = a.add_flow(flow("f-ref", "f-ref", &[])).unwrap();
    let f_em = a.add_flow(flow("f-em", "dust", &["air"])).unwrap();
    let mut p = Process::new("p", "p");
    p.add_reference(f_ref, Direction::Output, Some(1.0));
    p.add_exchange(f_em, Direction::Output, Some(0.9), None);
    p.add_exchange(f_ref, Direction::Input, Some(0.1), None);
    let pid = a.add_process(p).unwrap();

    let mgr = manager(a);
    assert_eq!(mgr.ndim(), 0);
    let pf = mgr.find_product_flow(f_ref, pid).unwrap();
    assert!((mgr.product_flow(pf).inbound_ev() - 0.9).abs() < 1e-12);

    // the emission was normalized by the post-absorption magnitude
    let frag = Fragment::new(&mgr, pf).unwrap();
    assert!((frag.bf().get(0, 0) - 1.0).abs() < 1e-12);
}

/// Two producers terminate the same flow; `mix` synthesizes a transient
/// market process that participates in the traversal as a product flow.
#[test]
fn mix_strategy_builds_a_virtual_market() {
    let mut a = Archive::new("mix");
    let f = a.add_flow(flow("f", "electricity", &[])).unwrap();
    let f_c = a.add_flow(flow("f-c", "gadget", &[])).unwrap();
    for uuid in ["p-a", "p-b"] {
        let mut p = Process::new(uuid, uuid);
        p.add_reference(f, Direction::Output, Some(1.0));
        a.add_process(p).unwrap();
    }
    let mut c = Process::new("c", "consumer");
    c.add_reference(f_c, Direction::Output, Some(1.0));
    c.add_exchange(f, Direction::Input, Some(2.0), None);
    let c = a.add_process(c).unwrap();

    let options = TraversalOptions {
        multi_term: MultiTermStrategy::Mix,
        ..Default::default()
    };
    let mut mgr = BackgroundManager::new(a, options).unwrap();
    mgr.add_all_ref_products().unwrap();

    // producers, consumer, plus the market
    assert_eq!(mgr.product_flow_count(), 4);
    let market_pf = (0..mgr.product_flow_count())
        .map(PfIndex)
        .find(|&pf| matches!(mgr.product_flow(pf).term(), TermRef::Virtual(_)))
        .expect("market product flow exists");
    let market = mgr.process(mgr.product_flow(market_pf).term());
    assert_eq!(market.name, "Market for electricity");
    let rx = market.find_reference(f).unwrap();
    assert_eq!(rx.value, Some(2.0));

    // consumer draws 2 units of the market; the market spreads one unit to
    // each producer, normalized by its reference magnitude of 2
    let pf_c = mgr.find_product_flow(f_c, c).unwrap();
    let frag = Fragment::new(&mgr, pf_c).unwrap();
    assert_eq!(frag.pdim(), 4);
    let x = frag.x_tilde(0).unwrap();
    let fg = frag.foreground();
    let market_col = fg.iter().position(|&pf| pf == market_pf).unwrap();
    assert_eq!(x[0], 1.0);
    assert_eq!(x[market_col], 2.0);
    // each producer ends up at one unit
    for (i, _) in fg.iter().enumerate() {
        if i != 0 && i != market_col {
            assert_eq!(x[i], 1.0);
        }
    }
}

/// Background LCI over a convergent cycle, checked against the dense
/// solution and the (I - A*) total = ad round trip.
#[test]
fn iterative_lci_converges_on_a_damped_cycle() {
    let mut a = Archive::new("damped");
    let f1 = a.add_flow(flow("f1", "f1", &[])).unwrap();
    let f2 = a.add_flow(flow("f2", "f2", &[])).unwrap();
    let f3 = a.add_flow(flow("f3", "product", &[])).unwrap();
    let e = a.add_flow(flow("e", "emission", &["air"])).unwrap();

    let mut p1 = Process::new("p1", "p1");
    p1.add_reference(f1, Direction::Output, Some(1.0));
    p1.add_exchange(f2, Direction::Input, Some(0.5), None);
    p1.add_exchange(e, Direction::Output, Some(1.0), None);
    let p1 = a.add_process(p1).unwrap();

    let mut p2 = Process::new("p2", "p2");
    p2.add_reference(f2, Direction::Output, Some(1.0));
    p2.add_exchange(f1, Direction::Input, Some(0.5), None);
    p2.add_exchange(e, Direction::Output, Some(2.0), None);
    a.add_process(p2).unwrap();

    let mut p3 = Process::new("p3", "p3");
    p3.add_reference(f3, Direction::Output, Some(1.0));
    p3.add_exchange(f1, Direction::Input, Some(5.0), None);
    let p3 = a.add_process(p3).unwrap();

    let mgr = manager(a);
    assert_eq!(mgr.ndim(), 2);

    // LCI of the foreground product: x = (I - A)^-1 [5, 0]
    // with A = [[0, 0.5], [0.5, 0]]: x = [20/3, 10/3], emissions = 40/3
    let pf3 = mgr.find_product_flow(f3, p3).unwrap();
    let (total, bx, bf_tilde) = mgr.compute_lci(pf3).unwrap();
    let pf1 = mgr.find_product_flow(f1, p1).unwrap();
    let c1 = mgr.tarjan().bg_dict(pf1).unwrap();
    assert!((total[c1] - 20.0 / 3.0).abs() < 1e-6);
    assert!((bx[0] - 40.0 / 3.0).abs() < 1e-6);
    assert_eq!(bf_tilde.len(), mgr.mdim());

    // P8: (I - A*) total = ad within the convergence threshold
    let a_star = mgr.a_matrix().unwrap();
    let a_total = a_star.matvec(total.view());
    let mut residual = total.clone();
    residual -= &a_total;
    let frag = Fragment::new(&mgr, pf3).unwrap();
    let ad_tilde = frag.ad_tilde(0).unwrap();
    for i in 0..mgr.ndim() {
        assert!((residual[i] - ad_tilde[i]).abs() < 1e-6);
    }

    // inventory rows surface the single non-zero emission
    let rows = mgr.lci(pf3).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].flow, e);
    assert_eq!(rows[0].direction, Direction::Output);
    assert!((rows[0].value - 40.0 / 3.0).abs() < 1e-6);
}

/// Normalization bookkeeping: recorded entry values equal traversal values
/// divided by the parent's inbound magnitude, applied exactly once.
#[test]
fn entries_normalize_by_the_inbound_magnitude() {
    let mut a = Archive::new("normalize");
    let f_ref = a.add_flow(flow("f-ref", "bulk product", &[])).unwrap();
    let f_in = a.add_flow(flow("f-in", "feedstock", &[])).unwrap();
    let f_em = a.add_flow(flow("f-em", "dust", &["air"])).unwrap();

    let mut p = Process::new("p", "bulk producer");
    // reference magnitude of 2: all other exchanges halve
    p.add_reference(f_ref, Direction::Output, Some(2.0));
    p.add_exchange(f_in, Direction::Input, Some(4.0), None);
    p.add_exchange(f_em, Direction::Output, Some(3.0), None);
    let pid = a.add_process(p).unwrap();

    let mut s = Process::new("s", "supplier");
    s.add_reference(f_in, Direction::Output, Some(1.0));
    a.add_process(s).unwrap();

    let mgr = manager(a);
    let pf = mgr.find_product_flow(f_ref, pid).unwrap();
    let frag = Fragment::new(&mgr, pf).unwrap();

    let supplier_col = frag
        .foreground()
        .iter()
        .position(|&x| x != pf)
        .expect("supplier is in the fragment");
    assert_eq!(frag.af().get(supplier_col, 0), 2.0);
    assert_eq!(frag.bf().get(0, 0), 1.5);
}

/// Two runs over the same archive produce identical indices and matrices.
#[test]
fn identical_runs_are_deterministic() {
    let build = || {
        let mut a = Archive::new("det");
        let f1 = a.add_flow(flow("f1", "f1", &[])).unwrap();
        let f2 = a.add_flow(flow("f2", "f2", &[])).unwrap();
        let f3 = a.add_flow(flow("f3", "f3", &[])).unwrap();
        let mut p1 = Process::new("p1", "p1");
        p1.add_reference(f1, Direction::Output, Some(1.0));
        p1.add_exchange(f2, Direction::Input, Some(0.25), None);
        p1.add_exchange(f3, Direction::Input, Some(1.0), None);
        a.add_process(p1).unwrap();
        let mut p2 = Process::new("p2", "p2");
        p2.add_reference(f2, Direction::Output, Some(1.0));
        p2.add_exchange(f1, Direction::Input, Some(0.25), None);
        a.add_process(p2).unwrap();
        let mut p3 = Process::new("p3", "p3");
        p3.add_reference(f3, Direction::Output, Some(1.0));
        p3.add_exchange(f1, Direction::Input, Some(0.5), None);
        a.add_process(p3).unwrap();

        let mgr = manager(a);
        let labels: Vec<String> = mgr.background_flows(None).map(|pf| mgr.label(pf)).collect();
        let triples = mgr.a_matrix().map(|m| m.to_triples());
        (labels, triples)
    };
    assert_eq!(build(), build());
}
