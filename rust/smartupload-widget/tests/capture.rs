use std::{cell::RefCell, rc::Rc};

use anyhow::Result;
use pretty_assertions::assert_eq;
use smartupload_widget::{
    CapturePolicy, CaptureStrategy, LifecycleController, PageContext, RawBody, WidgetConfig,
    emulator::{EmulatedDom, EmulatedNetwork, FetchRequest, Response},
};

#[cfg(target_arch = "wasm32")]
use wasm_bindgen_test::wasm_bindgen_test;
#[cfg(target_arch = "wasm32")]
wasm_bindgen_test::wasm_bindgen_test_configure!(run_in_dedicated_worker);

const SESSION_URL: &str = "https://api.smartupload.example/v1/updatesession";
const OTHER_URL: &str = "https://api.smartupload.example/v1/documents";

type Controller = LifecycleController<EmulatedDom, EmulatedNetwork>;

struct Page {
    dom: Rc<EmulatedDom>,
    network: Rc<EmulatedNetwork>,
    context: PageContext<EmulatedDom, EmulatedNetwork>,
}

impl Page {
    fn new() -> Self {
        let dom = Rc::new(EmulatedDom::default());
        let network = Rc::new(EmulatedNetwork::default());
        let context = PageContext::new(dom.clone(), network.clone());
        Self {
            dom,
            network,
            context,
        }
    }

    fn widget(&self, config: WidgetConfig) -> (Controller, Rc<RefCell<Vec<String>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let controller = LifecycleController::new(
            &self.context,
            Some(self.dom.create_container()),
            "urn:1",
            config,
            move |session_id: &str| sink.borrow_mut().push(session_id.to_owned()),
        );
        (controller, seen)
    }

    fn send_xhr(&self, url: &str, body: RawBody) {
        let xhr = self.network.xhr();
        xhr.open("POST", url);
        xhr.send(Some(body));
    }
}

fn json(text: &str) -> RawBody {
    RawBody::Text(text.to_owned())
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
#[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
async fn it_captures_the_session_from_an_xhr_body() -> Result<()> {
    let page = Page::new();
    let (controller, seen) = page.widget(WidgetConfig::default());
    controller.initialize().await;

    page.send_xhr(SESSION_URL, json(r#"{"sessionid":"abc123"}"#));

    assert_eq!(*seen.borrow(), vec!["abc123".to_string()]);
    assert_eq!(controller.session_id().as_deref(), Some("abc123"));
    Ok(())
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
#[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
async fn it_captures_form_bodies_sent_with_fetch() -> Result<()> {
    let page = Page::new();
    let (controller, seen) = page.widget(WidgetConfig::default());
    controller.initialize().await;

    page.network
        .fetch(FetchRequest::post(
            SESSION_URL,
            RawBody::FormData(vec![("sessionid".into(), "form-1".into())]),
        ))
        .await?;
    page.network
        .fetch(FetchRequest::post(SESSION_URL, json("step=2&sessionid=form-2")))
        .await?;

    assert_eq!(
        *seen.borrow(),
        vec!["form-1".to_string(), "form-2".to_string()]
    );
    Ok(())
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
#[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
async fn it_ignores_bodies_without_the_key() -> Result<()> {
    let page = Page::new();
    let (controller, seen) = page.widget(WidgetConfig::default());
    controller.initialize().await;

    page.send_xhr(SESSION_URL, json(r#"{"other":"value"}"#));
    page.send_xhr(SESSION_URL, json("not json at all"));
    page.send_xhr(SESSION_URL, RawBody::Opaque);
    page.send_xhr(OTHER_URL, json(r#"{"sessionid":"elsewhere"}"#));

    assert!(seen.borrow().is_empty());
    assert_eq!(controller.session_id(), None);
    assert_eq!(page.network.requests().len(), 4);
    Ok(())
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
#[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
async fn it_forwards_unrelated_calls_unchanged() -> Result<()> {
    let page = Page::new();
    page.network.respond_with(|call| {
        Ok(Response {
            status: 201,
            body: format!("{} {} {:?}", call.method, call.url, call.raw_body),
        })
    });
    let request = FetchRequest::post(OTHER_URL, json(r#"{"name":"passport.pdf"}"#));

    let before = page.network.fetch(request.clone()).await;
    let (controller, _) = page.widget(WidgetConfig::default());
    controller.initialize().await;
    let during = page.network.fetch(request.clone()).await;

    assert_eq!(before, during);
    let requests = page.network.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0], requests[1]);
    Ok(())
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
#[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
async fn it_reads_response_bodies_when_configured() -> Result<()> {
    let page = Page::new();
    page.network.respond_with(|call| {
        if call.url.contains("updatesession") {
            Ok(Response::ok(r#"{"sessionid":"from-response"}"#))
        } else {
            Ok(Response::ok("{}"))
        }
    });
    let config = WidgetConfig {
        capture_strategy: CaptureStrategy::ResponseBody,
        ..WidgetConfig::default()
    };
    let (controller, seen) = page.widget(config);
    controller.initialize().await;

    let response = page
        .network
        .fetch(FetchRequest::post(SESSION_URL, json(r#"{"sessionid":"from-request"}"#)))
        .await?;
    page.send_xhr(SESSION_URL, json(r#"{"sessionid":"from-request"}"#));

    assert_eq!(response, Response::ok(r#"{"sessionid":"from-response"}"#));
    assert_eq!(
        *seen.borrow(),
        vec!["from-response".to_string(), "from-response".to_string()]
    );
    Ok(())
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
#[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
async fn it_keeps_the_latest_session_by_default() -> Result<()> {
    let page = Page::new();
    let (controller, seen) = page.widget(WidgetConfig::default());
    controller.initialize().await;

    page.send_xhr(SESSION_URL, json(r#"{"sessionid":"s-1"}"#));
    page.send_xhr(SESSION_URL, json(r#"{"sessionid":"s-2"}"#));

    assert_eq!(*seen.borrow(), vec!["s-1".to_string(), "s-2".to_string()]);
    assert_eq!(controller.session_id().as_deref(), Some("s-2"));
    Ok(())
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
#[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
async fn it_keeps_the_first_session_per_generation() -> Result<()> {
    let page = Page::new();
    let config = WidgetConfig {
        capture_policy: CapturePolicy::FirstWins,
        ..WidgetConfig::default()
    };
    let (controller, seen) = page.widget(config);
    controller.initialize().await;

    page.send_xhr(SESSION_URL, json(r#"{"sessionid":"s-1"}"#));
    page.send_xhr(SESSION_URL, json(r#"{"sessionid":"s-2"}"#));
    assert_eq!(controller.session_id().as_deref(), Some("s-1"));

    controller.reinitialize().await;
    assert_eq!(controller.session_id(), None);
    page.send_xhr(SESSION_URL, json(r#"{"sessionid":"s-3"}"#));

    assert_eq!(*seen.borrow(), vec!["s-1".to_string(), "s-3".to_string()]);
    assert_eq!(controller.session_id().as_deref(), Some("s-3"));
    Ok(())
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
#[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
async fn it_shares_one_patch_between_widgets() -> Result<()> {
    let page = Page::new();
    let (original_fetch, original_open, original_send) = page.network.primitives();
    let (first, first_seen) = page.widget(WidgetConfig::default());
    let (second, second_seen) = page.widget(WidgetConfig::default());

    first.initialize().await;
    second.initialize().await;
    page.send_xhr(SESSION_URL, json(r#"{"sessionid":"shared"}"#));

    assert_eq!(page.network.install_count(), 1);
    assert_eq!(*first_seen.borrow(), vec!["shared".to_string()]);
    assert_eq!(*second_seen.borrow(), vec!["shared".to_string()]);

    first.teardown();
    assert!(page.network.is_patched());
    page.send_xhr(SESSION_URL, json(r#"{"sessionid":"after"}"#));
    assert_eq!(first_seen.borrow().len(), 1);
    assert_eq!(second_seen.borrow().len(), 2);

    second.teardown();
    assert!(!page.network.is_patched());
    let (fetch, open, send) = page.network.primitives();
    assert!(Rc::ptr_eq(&fetch, &original_fetch));
    assert!(Rc::ptr_eq(&open, &original_open));
    assert!(Rc::ptr_eq(&send, &original_send));
    Ok(())
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
#[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
async fn it_stops_capturing_after_teardown() -> Result<()> {
    let page = Page::new();
    let (controller, seen) = page.widget(WidgetConfig::default());
    controller.initialize().await;

    controller.teardown();
    page.send_xhr(SESSION_URL, json(r#"{"sessionid":"late"}"#));

    assert!(seen.borrow().is_empty());
    assert_eq!(page.network.requests().len(), 1);
    Ok(())
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
#[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
async fn it_forgets_the_session_on_teardown() -> Result<()> {
    let page = Page::new();
    let config = WidgetConfig {
        capture_policy: CapturePolicy::FirstWins,
        ..WidgetConfig::default()
    };
    let (controller, seen) = page.widget(config);
    controller.initialize().await;
    page.send_xhr(SESSION_URL, json(r#"{"sessionid":"s-1"}"#));

    controller.teardown();
    assert_eq!(controller.session_id(), None);

    controller.initialize().await;
    page.send_xhr(SESSION_URL, json(r#"{"sessionid":"s-2"}"#));

    assert_eq!(*seen.borrow(), vec!["s-1".to_string(), "s-2".to_string()]);
    assert_eq!(controller.session_id().as_deref(), Some("s-2"));
    Ok(())
}
