use flowforge::context::Context;
use flowforge::fixture::model;
use flowforge::resolve::metric_ids_for;
use flowforge::{
    CompileInput, CompileOptions, Compiler, Descriptor, FixtureRow, IdPolicy, parse_domain,
    parse_template,
};
use serde_json::{Value, json};

fn unit_square_network() -> Value {
    json!([
        { "category": "zone", "label": "Z", "coords": [[[0, 0], [1, 0], [1, 1], [0, 1], [0, 0]]] },
        { "category": "flow_meter", "label": "F", "coords": [0.5, 0.5] },
    ])
}

fn of_model<'r>(rows: &'r [FixtureRow], name: &str) -> Vec<&'r FixtureRow> {
    rows.iter().filter(|row| row.is(name)).collect()
}

fn metric<'r>(rows: &'r [FixtureRow], category: &str, target: &str) -> &'r FixtureRow {
    rows.iter()
        .find(|row| {
            row.is(model::METRIC)
                && row.field_str("category") == Some(category)
                && row.field_str("target_id") == Some(target)
        })
        .unwrap_or_else(|| panic!("no {category} metric on {target}"))
}

fn pk_text(row: &FixtureRow) -> &str {
    row.pk.as_text().unwrap()
}

#[test]
fn one_zone_one_flow_meter() {
    let mut compiler = Compiler::new(CompileOptions::default());
    let items = parse_domain(&unit_square_network()).unwrap();
    let rows = compiler.compile_domain(&items).unwrap().to_vec();

    let zones = of_model(&rows, model::POLYGON);
    let points = of_model(&rows, model::POINT);
    assert_eq!(zones.len(), 1);
    assert_eq!(points.len(), 1);
    let zone = pk_text(zones[0]);
    let meter = pk_text(points[0]);

    let links = of_model(&rows, model::LINK);
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].field_str("target_id1"), Some(meter));
    assert_eq!(links[0].field_str("target_id2"), Some(zone));
    assert_eq!(links[0].fields["args"]["role"], json!(["inlet"]));

    let reading = metric(&rows, "flow_reading", meter);
    assert_eq!(reading.field_str("source"), Some("USER"));
    let volume = metric(&rows, "flow_volume", meter);
    let demand = metric(&rows, "zone_demand", zone);

    let triggers = of_model(&rows, model::TRIGGER);
    let delta = triggers
        .iter()
        .find(|row| row.field_str("output_metric") == Some(pk_text(volume)))
        .unwrap();
    assert_eq!(delta.field("input_metrics"), Some(&json!([pk_text(reading)])));
    let sum = triggers
        .iter()
        .find(|row| row.field_str("output_metric") == Some(pk_text(demand)))
        .unwrap();
    assert_eq!(
        sum.fields["calculators"][0]["calc_name"],
        json!("CALCULATE_ZONE_DEMAND")
    );
    assert!(
        sum.fields["input_metrics"]
            .as_array()
            .unwrap()
            .contains(&json!(pk_text(volume)))
    );
}

#[test]
fn compiling_the_same_domain_twice_never_duplicates_metrics() {
    let mut compiler = Compiler::new(CompileOptions::default());
    let items = parse_domain(&unit_square_network()).unwrap();
    compiler.compile_domain(&items).unwrap();
    compiler.compile_domain(&items).unwrap();

    let mut keys: Vec<(String, String, String)> = of_model(compiler.rows(), model::METRIC)
        .iter()
        .map(|row| {
            (
                row.field_str("category").unwrap().to_owned(),
                row.field_str("interval").unwrap().to_owned(),
                row.field_str("target_id").unwrap().to_owned(),
            )
        })
        .collect();
    let total = keys.len();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), total);
    assert_eq!(of_model(compiler.rows(), model::TRIGGER).len(), 2);
}

#[test]
fn continuing_from_existing_rows_reuses_everything() {
    let input = CompileInput {
        domain: unit_square_network(),
        ..CompileInput::default()
    };
    let first = flowforge::compile(input.clone(), CompileOptions::default()).unwrap();
    let again = flowforge::compile(
        CompileInput {
            existing: first.clone(),
            ..input
        },
        CompileOptions::default(),
    )
    .unwrap();
    assert_eq!(again.len(), first.len());
    let pks = |rows: &[FixtureRow]| rows.iter().map(|row| row.pk.clone()).collect::<Vec<_>>();
    assert_eq!(pks(&again), pks(&first));
}

#[test]
fn deterministic_policy_reproduces_output() {
    let input = CompileInput {
        domain: unit_square_network(),
        template: ops_template(),
        sections: vec!["OPS".into()],
        existing: Vec::new(),
    };
    let a = flowforge::compile_to_json(input.clone(), CompileOptions::default()).unwrap();
    let b = flowforge::compile_to_json(input.clone(), CompileOptions::default()).unwrap();
    assert_eq!(a, b);

    let random = CompileOptions {
        id_policy: IdPolicy::Random,
        ..CompileOptions::default()
    };
    let c = flowforge::compile(input, random).unwrap();
    assert_eq!(c.len(), a.as_array().unwrap().len());
}

#[test]
fn same_descriptor_resolves_to_the_same_id() {
    let mut compiler = Compiler::new(CompileOptions::default());
    compiler
        .compile_domain(&parse_domain(&unit_square_network()).unwrap())
        .unwrap();
    let zone = Context::Zone(compiler.network().zones()[0].clone());
    let descriptor = Descriptor::parse("MetricCategory.Zone.zone_demand.qh").unwrap();
    let first = metric_ids_for(compiler.network(), &descriptor, &zone);
    let second = metric_ids_for(compiler.network(), &descriptor, &zone);
    assert_eq!(first.len(), 1);
    assert_eq!(first, second);
}

fn ops_template() -> Value {
    json!([
        { "model": model::PAGE, "abstraction_id": "page-ops",
          "fields": { "title": "Operations", "section": { "code": "OPS" },
                      "charts": ["chart-demand", "chart-leak"], "cards": ["card-azp"],
                      "maps": ["map-network"] } },
        { "model": model::CHART, "abstraction_id": "chart-demand",
          "fields": { "title": "Demand",
                      "args": { "metric_descriptors": ["MetricCategory.Zone.zone_demand.qh"] } } },
        { "model": model::CHART, "abstraction_id": "chart-leak",
          "fields": { "title": "Leakage",
                      "args": { "metric_descriptors": ["MetricCategory.Zone.zone_leak.qh"] } } },
        { "model": model::CARD, "abstraction_id": "card-azp",
          "fields": { "args": { "metric_descriptors": "MetricCategory.Zone.azp.qh" } } },
        { "model": model::MAP, "abstraction_id": "map-network",
          "fields": { "args": { "polygon_ids": ["[[zone_id]]"] } } },
        { "model": model::METRIC, "abstraction_id": "metric-leak",
          "fields": { "label": "Leakage – [[zone_label]]", "unit": "m³/h",
                      "category": "zone_leak", "interval": "qh", "target_id": "[FILL]" } },
        { "model": model::TRIGGER, "abstraction_id": "trigger-leak",
          "description": "Leakage – [[zone_label]]",
          "output_metric": "MetricCategory.Zone.zone_leak.qh",
          "calculators": [{ "calc_name": "CALCULATE_LEAKAGE",
              "calc_args": { "metric_id": "[FILL]", "inputs": { "metrics": [
                  "MetricCategory.Zone.zone_demand.qh",
                  "MetricCategory.Zone.azp.qh"
              ] } } }] },
    ])
}

#[test]
fn template_section_end_to_end() {
    let mut compiler = Compiler::new(CompileOptions::default());
    compiler
        .compile_domain(&parse_domain(&unit_square_network()).unwrap())
        .unwrap();
    let low_level = compiler.rows().to_vec();
    let template = parse_template(&ops_template()).unwrap();
    let rows = compiler.compile_template(&template, &["OPS".to_owned()]).to_vec();

    let models: Vec<&str> = rows.iter().map(|row| row.model.as_str()).collect();
    assert_eq!(
        models,
        vec![
            model::METRIC,
            model::TRIGGER,
            model::CARD,
            model::CHART,
            model::CHART,
            model::MAP,
            model::PAGE
        ]
    );

    let zone = pk_text(of_model(&low_level, model::POLYGON)[0]).to_owned();
    let demand = pk_text(metric(&low_level, "zone_demand", &zone)).to_owned();
    let azp = pk_text(metric(&low_level, "average_zone_pressure", &zone)).to_owned();

    let leak = &rows[0];
    assert_eq!(leak.field_str("target_id"), Some(zone.as_str()));
    assert_eq!(leak.field_str("interval"), Some("QUARTER_HOUR"));
    assert_eq!(leak.field_str("label"), Some("Leakage – Z"));

    let trigger = &rows[1];
    assert_eq!(trigger.field("input_metrics"), Some(&json!([demand, azp])));
    assert_eq!(trigger.field_str("output_metric"), leak.pk.as_text());
    let token = trigger.fields["calculators"][0]["calc_args"]["metric_id"]
        .as_str()
        .unwrap();
    assert_eq!(token.len(), 36);

    let card = &rows[2];
    assert_eq!(card.fields["args"], json!({ "metric_ids": [azp] }));
    let chart_demand = &rows[3];
    assert_eq!(chart_demand.field("metrics"), Some(&json!([demand])));
    let chart_leak = &rows[4];
    assert_eq!(chart_leak.field("metrics"), Some(&json!([pk_text(leak)])));
    let map = &rows[5];
    assert_eq!(map.fields["args"]["polygon_ids"], json!([zone]));
    assert_eq!(map.fields["center"], json!([0.4, 0.4]));

    let page = &rows[6];
    assert_eq!(
        page.field("charts"),
        Some(&json!([chart_demand.pk.to_json(), chart_leak.pk.to_json()]))
    );
    assert_eq!(page.field("cards"), Some(&json!([card.pk.to_json()])));
    assert_eq!(page.field("maps"), Some(&json!([map.pk.to_json()])));

    // Integer keys continue after the low-level link.
    let link = of_model(&low_level, model::LINK)[0].pk.as_int().unwrap();
    assert_eq!(card.pk.as_int(), Some(link + 1));
}

#[test]
fn zero_sections_produce_nothing() {
    let mut compiler = Compiler::new(CompileOptions::default());
    compiler
        .compile_domain(&parse_domain(&unit_square_network()).unwrap())
        .unwrap();
    let template = parse_template(&ops_template()).unwrap();
    assert!(compiler.compile_template(&template, &[]).is_empty());
}

#[test]
fn second_trigger_for_the_same_output_wins() {
    let template = json!([
        { "model": model::PAGE, "fields": { "page": "P", "cards": ["card"] } },
        { "model": model::CARD, "abstraction_id": "card",
          "fields": { "args": { "metric_descriptors": ["MetricCategory.Zone.zone_demand.qh"] } } },
        { "model": model::TRIGGER, "abstraction_id": "first", "description": "first",
          "output_metric": "MetricCategory.Zone.zone_demand.qh",
          "calculators": [{ "calc_name": "SUM",
              "calc_args": { "inputs": { "metrics": ["MetricCategory.FlowMeter.flow_volume.qh"] } } }] },
        { "model": model::TRIGGER, "abstraction_id": "second", "description": "second",
          "output_metric": "MetricCategory.Zone.zone_demand.qh",
          "calculators": [{ "calc_name": "SUM",
              "calc_args": { "inputs": { "metrics": ["MetricCategory.FlowMeter.flow_volume.qh"] } } }] },
    ]);
    let options = CompileOptions {
        starter_metrics: true,
        ..CompileOptions::default()
    };
    let mut compiler = Compiler::new(options);
    compiler
        .compile_domain(&parse_domain(&unit_square_network()).unwrap())
        .unwrap();
    compiler.compile_template(&parse_template(&template).unwrap(), &["P".to_owned()]);

    let zone = compiler.network().zones()[0].id.clone();
    let demand = pk_text(metric(compiler.rows(), "zone_demand", &zone)).to_owned();
    let producing: Vec<&FixtureRow> = of_model(compiler.rows(), model::TRIGGER)
        .into_iter()
        .filter(|row| row.field_str("output_metric") == Some(demand.as_str()))
        .collect();
    assert_eq!(producing.len(), 1);
    assert_eq!(producing[0].field_str("description"), Some("second"));
    assert_eq!(producing[0].fields["calculators"][0]["calc_name"], json!("SUM"));
}

#[test]
fn trigger_with_no_resolvable_inputs_is_not_emitted() {
    let domain = json!([
        { "category": "zone", "label": "Dry", "coords": [[[0, 0], [1, 0], [1, 1], [0, 1]]] },
    ]);
    let template = json!([
        { "model": model::PAGE, "fields": { "page": "P", "charts": ["chart"] } },
        { "model": model::CHART, "abstraction_id": "chart",
          "fields": { "args": { "metric_descriptors": ["MetricCategory.Zone.zone_demand.qh"] } } },
        { "model": model::TRIGGER, "abstraction_id": "demand",
          "output_metric": "MetricCategory.Zone.zone_demand.qh",
          "calculators": [{ "calc_name": "CALCULATE_ZONE_DEMAND",
              "calc_args": { "inputs": { "metrics": ["MetricCategory.FlowMeter.flow_volume.qh"] } } }] },
    ]);
    let rows = flowforge::compile(
        CompileInput {
            domain,
            template,
            sections: vec!["P".into()],
            existing: Vec::new(),
        },
        CompileOptions::default(),
    )
    .unwrap();
    assert!(of_model(&rows, model::TRIGGER).is_empty());
    assert_eq!(of_model(&rows, model::CHART).len(), 1);
}

#[test]
fn point_scoped_trigger_runs_once_per_matching_point() {
    let domain = json!([
        { "category": "zone", "label": "Z",
          "coords": [[[0, 0], [10, 0], [10, 10], [0, 10], [0, 0]]] },
        { "category": "flow_meter", "label": "F1", "coords": [2, 2] },
        { "category": "flow_meter", "label": "F2", "coords": [8, 8] },
        { "category": "pressure_sensor", "label": "P", "coords": [5, 5] },
    ]);
    let template = json!([
        { "model": model::PAGE, "fields": { "page": "P", "cards": ["card-volume"] } },
        { "model": model::CARD, "abstraction_id": "card-volume",
          "fields": { "args": {
              "metric_descriptors": ["MetricCategory.FlowMeter.flow_volume.qh"] } } },
        { "model": model::TRIGGER, "abstraction_id": "trigger-volume",
          "description": "Template volume",
          "output_metric": "MetricCategory.FlowMeter.flow_volume.qh",
          "calculators": [{ "calc_name": "CALCULATE_DELTA",
              "calc_args": { "inputs": { "metrics": [
                  "MetricCategory.FlowMeter.flow_reading.qh"
              ] } } }] },
    ]);
    let mut compiler = Compiler::new(CompileOptions::default());
    compiler.compile_domain(&parse_domain(&domain).unwrap()).unwrap();
    let low_level_triggers = of_model(compiler.rows(), model::TRIGGER).len();
    compiler.compile_template(&parse_template(&template).unwrap(), &["P".to_owned()]);
    let rows = compiler.rows().to_vec();

    let point_id = |label: &str| {
        of_model(&rows, model::POINT)
            .into_iter()
            .find(|row| row.field_str("label") == Some(label))
            .map(|row| pk_text(row).to_owned())
            .unwrap()
    };
    let triggers = of_model(&rows, model::TRIGGER);
    assert_eq!(triggers.len(), low_level_triggers);

    let templated: Vec<&FixtureRow> = triggers
        .iter()
        .copied()
        .filter(|row| row.field_str("description") == Some("Template volume"))
        .collect();
    assert_eq!(templated.len(), 2);
    for (row, label) in templated.iter().zip(["F1", "F2"]) {
        let meter = point_id(label);
        let volume = pk_text(metric(&rows, "flow_volume", &meter));
        let reading = pk_text(metric(&rows, "flow_reading", &meter));
        assert_eq!(row.field_str("output_metric"), Some(volume));
        assert_eq!(row.field("input_metrics"), Some(&json!([reading])));
    }

    let sensor = point_id("P");
    let outputs_on_sensor = triggers
        .iter()
        .filter_map(|row| row.field_str("output_metric"))
        .filter(|output| {
            rows.iter().any(|row| {
                row.pk.as_text() == Some(*output)
                    && row.field_str("target_id") == Some(sensor.as_str())
            })
        })
        .count();
    assert_eq!(outputs_on_sensor, 0);
}
