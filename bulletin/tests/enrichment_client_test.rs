use std::time::Duration;

use bulletin::enrichment::client::{CrawlServiceClient, EnrichmentClient};
use mockito::Matcher;
use serde_json::json;

const ARTICLE_URL: &str = "https://www.elcomercio.com/actualidad/quito/metro-horario";
const BROKEN_URL: &str = "https://www.elcomercio.com/actualidad/roto";

#[tokio::test]
async fn test_enrich_urls_keeps_per_url_outcomes() {
    let mut server = mockito::Server::new_async().await;

    let ok = server
        .mock("POST", "/crawl")
        .match_body(Matcher::PartialJson(json!({"urls": [ARTICLE_URL]})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "success": true,
                "results": [{
                    "url": ARTICLE_URL,
                    "success": true,
                    "markdown": {
                        "raw_markdown": "# Metro de Quito amplía su horario\n\nDesde este lunes el Metro de Quito operará hasta las 23:00 en días laborables, informó la empresa.",
                        "fit_markdown": ""
                    },
                    "metadata": {"title": "Metro de Quito amplía su horario", "author": "Redacción Quito"},
                    "media": {"images": [{"src": "/files/metro.jpg"}]}
                }]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let broken = server
        .mock("POST", "/crawl")
        .match_body(Matcher::PartialJson(json!({"urls": [BROKEN_URL]})))
        .with_status(500)
        .with_body("browser crashed")
        .create_async()
        .await;

    let client = CrawlServiceClient::new(server.url(), Duration::from_secs(5)).unwrap();
    let urls = vec![ARTICLE_URL.to_string(), BROKEN_URL.to_string()];
    let outcomes = client.enrich_urls(&urls, 2).await.unwrap();

    assert_eq!(outcomes.len(), 2);
    let (_, good) = outcomes.iter().find(|(u, _)| u == ARTICLE_URL).unwrap();
    let good = good.as_ref().unwrap();
    assert_eq!(good.title, "Metro de Quito amplía su horario");
    assert_eq!(good.author.as_deref(), Some("Redacción Quito"));
    assert_eq!(good.image_url.as_deref(), Some("https://www.elcomercio.com/files/metro.jpg"));
    assert!(good.full_content.contains("23:00"));

    let (_, bad) = outcomes.iter().find(|(u, _)| u == BROKEN_URL).unwrap();
    assert!(bad.as_ref().unwrap_err().to_string().contains("500"));

    ok.assert_async().await;
    broken.assert_async().await;
}

#[tokio::test]
async fn test_image_urls_are_skipped_without_request() {
    let mut server = mockito::Server::new_async().await;
    let mock = server.mock("POST", "/crawl").expect(0).create_async().await;

    let client = CrawlServiceClient::new(server.url(), Duration::from_secs(5)).unwrap();
    let err = client
        .enrich_one("https://www.elcomercio.com/files/portada.jpg")
        .await
        .unwrap_err();

    assert!(err.to_string().contains("image"));
    mock.assert_async().await;
}
