/// Landing page embedding the MJPEG feed.
pub const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Traffic stream</title>
  <style>
    body { margin: 0; background: #111; color: #ddd; font-family: sans-serif; }
    header { padding: 12px 20px; font-size: 18px; }
    main { display: flex; justify-content: center; }
    img { max-width: 100%; height: auto; border: 1px solid #333; }
  </style>
</head>
<body>
  <header>Vehicle tracking</header>
  <main><img src="/video_feed" alt="annotated video feed"></main>
</body>
</html>
"#;
