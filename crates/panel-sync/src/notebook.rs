//! Rendering models into notebook display data.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use serde_json::{json, Value};

use crate::component::Component;
use crate::config::Config;
use crate::document::{add_to_doc, Document};
use crate::embed::embed_state;
use crate::error::{Result, SyncError};
use crate::hold::HoldGate;
use crate::model::ModelId;
use crate::protocol::codec::{encode_model, BufferCollector};

pub const LOAD_MIME: &str = "application/vnd.holoviews_load.v0+json";
pub const EXEC_MIME: &str = "application/vnd.holoviews_exec.v0+json";
pub const HTML_MIME: &str = "text/html";
pub const JS_MIME: &str = "application/javascript";

const COMM_JS: &str = r#"
function msg_handler(msg) {
  var buffers = msg.buffers;
  var content = msg.content.data;
  var plot_id = '{plot_id}';
  var doc = Bokeh.index[plot_id].model.document;
  var receiver = new Bokeh.protocol.Receiver();
  receiver.consume(content.header);
  receiver.consume(content.metadata);
  receiver.consume(content.content);
  if (receiver.message) {
    doc.apply_json_patch(receiver.message.content, receiver.message.buffers);
  }
}
window.PyViz.comm_manager.register_target('{plot_id}', '{comm_id}', msg_handler);
"#;

/// A display data payload: MIME type to rendered content, plus metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MimeBundle {
    pub data: BTreeMap<String, String>,
    pub metadata: Value,
}

/// Add `root` to `doc` as a held root and render it.
///
/// Only layout models can be displayed; anything else is rejected before the
/// document is touched.
pub fn render_mimebundle(doc: &mut Document, root: &ModelId, comm_id: Option<&str>) -> Result<MimeBundle> {
    ensure_layout(doc, root)?;
    add_to_doc(doc, root, true)?;
    render_model(doc, root, comm_id)
}

/// Render a component tree as notebook output.
///
/// When `config` resolves to embedding, every widget state is exported into
/// the document first so the output stays interactive without a kernel.
pub fn render_component(
    tree: &mut Component,
    doc: &mut Document,
    gate: &HoldGate,
    config: &Config,
    comm_id: Option<&str>,
) -> Result<MimeBundle> {
    let settings = config.resolve();
    let root = tree.get_root(doc);
    ensure_layout(doc, &root)?;
    if settings.embed {
        embed_state(tree, &root, doc, gate, &settings.embed_options)?;
    }
    render_mimebundle(doc, &root, comm_id)
}

fn ensure_layout(doc: &Document, root: &ModelId) -> Result<()> {
    let model = doc
        .model(root)
        .ok_or_else(|| SyncError::UnknownModel(root.to_string()))?;
    if !model.is_layout() {
        return Err(SyncError::TypeContract {
            expected: "LayoutDOM",
            found: model.model_type().to_string(),
        });
    }
    Ok(())
}

/// Render the model tree under `root` as standalone notebook output.
///
/// The other roots of `doc`, such as an exported state, are serialized along
/// with it. With a `comm_id` the output also registers a handler that applies
/// patches pushed over that comm.
pub fn render_model(doc: &Document, root: &ModelId, comm_id: Option<&str>) -> Result<MimeBundle> {
    if !doc.contains(root) {
        return Err(SyncError::UnknownModel(root.to_string()));
    }

    let mut root_ids = vec![root];
    root_ids.extend(doc.roots().iter().filter(|id| *id != root));
    let mut collector = BufferCollector::new(false);
    let mut seen = HashSet::new();
    let references = root_ids
        .iter()
        .flat_map(|id| doc.subtree(id))
        .filter(|model| seen.insert(model.id().clone()))
        .map(|model| encode_model(model, &mut collector))
        .collect::<Result<Vec<_>>>()?;
    let docid = uuid::Uuid::new_v4().to_string();
    let docs_json = json!({
        docid.clone(): {
            "title": doc.title(),
            "roots": {"root_ids": root_ids, "references": references},
            "version": env!("CARGO_PKG_VERSION"),
        }
    });
    let render_items = json!([{"docid": docid, "roots": {root.as_str(): root.as_str()}}]);

    let target = root.as_str();
    let div = format!("<div class=\"bk-root\" id=\"{}\"></div>", target);
    let html = format!("<div id='{}'>{}</div>", target, div);

    let mut script = String::new();
    if let Some(comm_id) = comm_id {
        script.push_str(
            &COMM_JS
                .replace("{plot_id}", target)
                .replace("{comm_id}", comm_id),
        );
    }
    script.push_str(&format!(
        "var docs_json = {};\nvar render_items = {};\nBokeh.embed.embed_items_notebook(docs_json, render_items);\n",
        serde_json::to_string(&docs_json)?,
        serde_json::to_string(&render_items)?,
    ));

    let data = BTreeMap::from([
        (EXEC_MIME.to_string(), String::new()),
        (HTML_MIME.to_string(), html),
        (JS_MIME.to_string(), script),
    ]);
    Ok(MimeBundle {
        data,
        metadata: json!({ EXEC_MIME: {"id": target} }),
    })
}

/// Flatten a bundle into HTML, appending any JavaScript as a script tag.
pub fn mimebundle_to_html(bundle: &MimeBundle) -> String {
    let mut html = bundle.data.get(HTML_MIME).cloned().unwrap_or_default();
    if let Some(js) = bundle.data.get(JS_MIME) {
        html.push_str(&format!(
            "\n<script type=\"application/javascript\">{}</script>",
            js
        ));
    }
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Layout, Options, Pane, Widget};
    use crate::model::Model;

    fn column(doc: &mut Document) -> ModelId {
        let child = doc.insert_model(Model::new("Div").with_property("text", json!("hi")));
        doc.insert_model(Model::new("Column").with_property("children", json!([child.to_ref()])))
    }

    #[test]
    fn test_render_mimebundle_holds_document() {
        let mut doc = Document::new();
        let root = column(&mut doc);

        let bundle = render_mimebundle(&mut doc, &root, Some("comm-1")).unwrap();
        assert!(doc.is_held());
        assert_eq!(doc.roots(), &[root.clone()]);
        assert_eq!(bundle.metadata[EXEC_MIME]["id"], json!(root.as_str()));

        let js = &bundle.data[JS_MIME];
        assert!(js.contains("register_target"));
        assert!(js.contains("comm-1"));
        assert!(js.contains("\"text\":\"hi\""));
    }

    #[test]
    fn test_non_layout_rejected() {
        let mut doc = Document::new();
        let id = doc.insert_model(Model::new("ColumnDataSource"));
        let err = render_mimebundle(&mut doc, &id, None).unwrap_err();
        assert!(matches!(err, SyncError::TypeContract { expected: "LayoutDOM", .. }));
        assert_eq!(err.to_string(), "Can only render LayoutDOM models, got ColumnDataSource");
        assert!(doc.roots().is_empty());
        assert!(!doc.is_held());
    }

    fn slider_with_output() -> Component {
        Component::from(Layout::column(vec![
            Widget::select("s", Options::List(vec![json!("a"), json!("b")])).unwrap().into(),
            Pane::html("a").into(),
        ]))
    }

    #[test]
    fn test_render_component_embeds_states() {
        let mut doc = Document::new();
        let mut tree = slider_with_output();
        let config = Config::new()
            .with_embed(true)
            .with_embed_max_states(10)
            .with_embed_max_opts(3);

        let bundle = render_component(&mut tree, &mut doc, &HoldGate::new(), &config, None).unwrap();

        assert_eq!(doc.roots().len(), 2);
        let state = doc.model(&doc.roots()[1]).unwrap();
        assert_eq!(state.model_type(), "State");
        let js = &bundle.data[JS_MIME];
        assert!(js.contains("\"type\":\"State\""));
        assert!(js.contains(state.id().as_str()));
    }

    #[test]
    fn test_render_component_without_embedding() {
        let mut doc = Document::new();
        let mut tree = slider_with_output();
        let config = Config::new().with_embed(false);

        let bundle = render_component(&mut tree, &mut doc, &HoldGate::new(), &config, Some("c")).unwrap();

        assert_eq!(doc.roots().len(), 1);
        assert!(doc.is_held());
        assert!(!bundle.data[JS_MIME].contains("State"));
        assert!(bundle.data[JS_MIME].contains("register_target"));
    }

    #[test]
    fn test_mimebundle_to_html() {
        let mut doc = Document::new();
        let root = column(&mut doc);
        let bundle = render_model(&doc, &root, None).unwrap();
        assert!(!bundle.data[JS_MIME].contains("register_target"));

        let html = mimebundle_to_html(&bundle);
        assert!(html.starts_with(&format!("<div id='{}'>", root)));
        assert!(html.contains("<script type=\"application/javascript\">"));

        let bare = MimeBundle {
            data: BTreeMap::from([(HTML_MIME.to_string(), "<p>x</p>".to_string())]),
            metadata: Value::Null,
        };
        assert_eq!(mimebundle_to_html(&bare), "<p>x</p>");
    }
}
