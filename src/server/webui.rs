//! Default dashboard files
//!
//! The web directory is user-servable static content; on first run the
//! default landing page and monitor dashboard are written there so the
//! exporter works out of the box. Existing files are never overwritten.

use std::io;
use std::path::Path;

use tracing::info;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Envoy Prometheus Exporter</title>
    <style>
        body { font-family: Arial, sans-serif; margin: 40px; background: #f5f5f5; }
        .container { max-width: 900px; margin: 0 auto; background: white; padding: 30px; border-radius: 8px; }
        h1 { color: #2c3e50; text-align: center; }
        ul { line-height: 2; }
    </style>
</head>
<body>
    <div class="container">
        <h1>Envoy Prometheus Exporter</h1>
        <ul>
            <li><a href="/monitor.html">Live monitor dashboard</a></li>
            <li><a href="/metrics">Prometheus metrics</a></li>
            <li><a href="/health">Health check</a></li>
            <li><a href="/debug">Debug info</a></li>
            <li><a href="/version">Version</a></li>
        </ul>
    </div>
</body>
</html>
"#;

const MONITOR_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Solar System Monitor</title>
    <style>
        body { font-family: 'Segoe UI', sans-serif; background: #667eea; color: #333; margin: 0; }
        .container { max-width: 1200px; margin: 0 auto; padding: 20px; }
        .card { background: rgba(255,255,255,0.95); border-radius: 12px; padding: 20px; margin-bottom: 20px; }
        .grid { display: grid; grid-template-columns: repeat(auto-fit, minmax(300px, 1fr)); gap: 20px; }
        .metric { display: flex; justify-content: space-between; padding: 8px 0; border-bottom: 1px solid #ecf0f1; }
        .metric:last-child { border-bottom: none; }
        .value { font-weight: bold; }
        h1, h3 { color: #2c3e50; margin-top: 0; }
        #inverters { display: grid; grid-template-columns: repeat(auto-fill, minmax(160px, 1fr)); gap: 10px; }
        .inverter { background: #f8f9fa; border-radius: 8px; padding: 10px; text-align: center; }
    </style>
</head>
<body>
    <div class="container">
        <div class="card"><h1>Solar System Monitor</h1><div id="updated">Loading...</div></div>
        <div class="grid">
            <div class="card">
                <h3>Production</h3>
                <div class="metric"><span>Power</span><span class="value" id="watts">--</span></div>
                <div class="metric"><span>Today</span><span class="value" id="today">--</span></div>
                <div class="metric"><span>Lifetime</span><span class="value" id="lifetime">--</span></div>
            </div>
            <div class="card">
                <h3>Power Flow</h3>
                <div class="metric"><span>Solar</span><span class="value" id="pv">--</span></div>
                <div class="metric"><span>Load</span><span class="value" id="load">--</span></div>
                <div class="metric"><span>Grid</span><span class="value" id="grid">--</span></div>
            </div>
            <div class="card">
                <h3>Summary</h3>
                <div class="metric"><span>Self consumption</span><span class="value" id="selfc">--</span></div>
                <div class="metric"><span>Solar coverage</span><span class="value" id="cover">--</span></div>
                <div class="metric"><span>Active inverters</span><span class="value" id="active">--</span></div>
                <div class="metric"><span>Sun elevation</span><span class="value" id="elev">--</span></div>
            </div>
        </div>
        <div class="card"><h3>Inverters</h3><div id="inverters">Loading...</div></div>
    </div>
    <script>
        function watts(w) {
            if (Math.abs(w) >= 1000) return (w / 1000).toFixed(1) + ' kW';
            return Math.round(w) + ' W';
        }
        function wh(v) {
            if (v >= 1000000) return (v / 1000000).toFixed(2) + ' MWh';
            if (v >= 1000) return (v / 1000).toFixed(1) + ' kWh';
            return Math.round(v) + ' Wh';
        }
        async function refresh() {
            try {
                const r = await fetch('/api/monitor');
                const d = await r.json();
                document.getElementById('watts').textContent = watts(d.production.current_watts);
                document.getElementById('today').textContent = wh(d.production.today_wh);
                document.getElementById('lifetime').textContent = wh(d.production.lifetime_wh);
                document.getElementById('pv').textContent = watts(d.power_flow.pv_watts);
                document.getElementById('load').textContent = watts(d.power_flow.load_watts);
                document.getElementById('grid').textContent = watts(d.power_flow.grid_watts);
                document.getElementById('selfc').textContent = d.summary.self_consumption.toFixed(1) + '%';
                document.getElementById('cover').textContent = d.summary.solar_coverage.toFixed(1) + '%';
                document.getElementById('active').textContent = d.summary.active_inverters + ' / ' + d.summary.total_inverters;
                document.getElementById('elev').textContent = d.solar_position.elevation.toFixed(1) + '°';
                const grid = document.getElementById('inverters');
                grid.innerHTML = '';
                for (const inv of d.inverters) {
                    const card = document.createElement('div');
                    card.className = 'inverter';
                    card.innerHTML = '<div>' + inv.serial + '</div><div class="value">' + watts(inv.current_watts) + '</div>';
                    grid.appendChild(card);
                }
                document.getElementById('updated').textContent = 'Last updated: ' + new Date(d.timestamp).toLocaleTimeString();
            } catch (e) {
                document.getElementById('updated').textContent = 'Error: ' + e.message + ' (retrying...)';
            }
        }
        refresh();
        setInterval(refresh, 30000);
    </script>
</body>
</html>
"#;

/// Create the web directory and default pages when they do not exist.
pub fn ensure_web_files(web_dir: &Path) -> io::Result<()> {
    if !web_dir.exists() {
        info!(web_dir = %web_dir.display(), "Creating web directory");
        std::fs::create_dir_all(web_dir)?;
    }

    for (name, content) in [("index.html", INDEX_HTML), ("monitor.html", MONITOR_HTML)] {
        let path = web_dir.join(name);
        if !path.exists() {
            std::fs::write(&path, content)?;
            info!(file = %path.display(), "Created default web file");
        }
    }

    Ok(())
}
