use anyhow::Result;
use chrono::Utc;
use serde::Serialize;

use flowmat_archive::CompartmentClassifier;
use flowmat_background::{BackgroundManager, CscMatrix, Fragment};

/// A fragment serialized with stable entity keys: `LM` for LCIA methods,
/// `FF` for foreground flows, `AD` for background rows, `EM` for emission
/// rows, each zero-padded to the width of its dimension.
#[derive(Debug, Serialize)]
pub struct FragmentDocument {
    created: String,
    product_flow: String,
    pdim: usize,
    ndim: usize,
    mdim: usize,
    tdim: usize,
    foreground: Vec<Entity>,
    background: Vec<Entity>,
    emissions: Vec<EmissionEntity>,
    methods: Vec<Entity>,
    af: Vec<Triple>,
    ad: Vec<Triple>,
    bf: Vec<Triple>,
    x_tilde: Vec<f64>,
    scores: Vec<Score>,
}

#[derive(Debug, Serialize)]
struct Entity {
    key: String,
    label: String,
}

#[derive(Debug, Serialize)]
struct EmissionEntity {
    key: String,
    flow: String,
    compartment: Vec<String>,
    direction: String,
    elementary: bool,
}

#[derive(Debug, Serialize)]
struct Triple {
    row: String,
    col: String,
    value: f64,
}

#[derive(Debug, Serialize)]
struct Score {
    method: String,
    foreground: f64,
    background: f64,
}

fn key_width(n: usize) -> usize {
    if n <= 1 {
        0
    } else {
        (n as f64).log10().ceil() as usize
    }
}

fn entity_key(prefix: &str, width: usize, index: usize) -> String {
    format!("{prefix}{index:0width$}")
}

fn keyed_triples(
    matrix: &CscMatrix,
    row_prefix: &str,
    row_width: usize,
    col_prefix: &str,
    col_width: usize,
) -> Vec<Triple> {
    matrix
        .to_triples()
        .into_iter()
        .map(|(row, col, value)| Triple {
            row: entity_key(row_prefix, row_width, row),
            col: entity_key(col_prefix, col_width, col),
            value,
        })
        .collect()
}

pub fn fragment_document(
    manager: &BackgroundManager,
    fragment: &mut Fragment,
    classifier: &CompartmentClassifier,
) -> Result<FragmentDocument> {
    let archive = manager.archive();
    let bg_flows = fragment.bg_flows();

    let ff_width = key_width(fragment.pdim());
    let ad_width = key_width(bg_flows.len());
    let em_width = key_width(fragment.mdim());
    let lm_width = key_width(fragment.tdim());

    let foreground = fragment
        .foreground()
        .iter()
        .enumerate()
        .map(|(n, &pf)| Entity {
            key: entity_key("FF", ff_width, n),
            label: manager.label(pf),
        })
        .collect();
    let background = bg_flows
        .iter()
        .enumerate()
        .map(|(n, &pf)| Entity {
            key: entity_key("AD", ad_width, n),
            label: manager.label(pf),
        })
        .collect();

    let is_elem = fragment.is_elem(classifier);
    let emissions = fragment
        .emissions()
        .iter()
        .enumerate()
        .map(|(n, em)| {
            let flow = archive.flow(em.flow);
            EmissionEntity {
                key: entity_key("EM", em_width, n),
                flow: flow.name.clone(),
                compartment: flow.compartment.clone(),
                direction: em.direction.to_string(),
                elementary: is_elem[n],
            }
        })
        .collect();

    let methods: Vec<Entity> = fragment
        .lcia_methods()
        .iter()
        .enumerate()
        .map(|(n, &q)| Entity {
            key: entity_key("LM", lm_width, n),
            label: archive.quantity(q).name.clone(),
        })
        .collect();

    let af = keyed_triples(fragment.af(), "FF", ff_width, "FF", ff_width);
    let ad = keyed_triples(fragment.ad(), "AD", ad_width, "FF", ff_width);
    let bf = keyed_triples(fragment.bf(), "EM", em_width, "FF", ff_width);
    let x_tilde = fragment.x_tilde(0)?.to_vec();

    let fg_scores = fragment.fg_lcia()?;
    let bg_scores = fragment.bg_lcia()?;
    let scores = methods
        .iter()
        .enumerate()
        .map(|(t, m)| Score {
            method: m.key.clone(),
            foreground: fg_scores[t],
            background: bg_scores[t],
        })
        .collect();

    Ok(FragmentDocument {
        created: Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        product_flow: manager.label(fragment.product_flow()),
        pdim: fragment.pdim(),
        ndim: fragment.ndim(),
        mdim: fragment.mdim(),
        tdim: fragment.tdim(),
        foreground,
        background,
        emissions,
        methods,
        af,
        ad,
        bf,
        x_tilde,
        scores,
    })
}
