use obs_form_scripts::{Page, PageBindings, ops};

#[test]
fn observation_entry_flow_matches_the_live_page() -> obs_form_scripts::Result<()> {
    let html = r#"
    <!DOCTYPE html>
    <html>
      <head>
        <title>New observation</title>
        <style>
          #spoiler_id { margin: 0.5em 0; }
        </style>
      </head>
      <body>
        <a id='show_id' href='#' onclick='sp_f1(); return false;'>Show plate notes</a>
        <div id='spoiler_id' style='display: none;'>
          <p>Seeing 3/5, moonless, dew on the corrector by 02:00.</p>
        </div>
        <form name='add_obs' action='/observations/new' method='post' onsubmit='return validate_obsForm();'>
          <input id='obs_date' name='obs_date' type='text'>
          <input id='ntime' name='ntime' type='text' onfocus='now_time()'>
          <textarea id='obs_desc' name='obs_desc'></textarea>
          <input id='content' name='content' type='file'>
          <input type='submit' value='Save'>
        </form>
      </body>
    </html>
    "#;

    let mut page = Page::from_html(html)?;
    let bindings = PageBindings::default();

    ops::reveal_spoiler(&mut page, &bindings)?;
    page.assert_visible("spoiler_id", true)?;
    page.assert_visible("show_id", false)?;
    ops::conceal_spoiler(&mut page, &bindings)?;
    page.assert_visible("spoiler_id", false)?;
    page.assert_visible("show_id", true)?;

    page.set_clock(22, 41)?;
    page.fill_time_field(&bindings)?;
    page.assert_value("ntime", "22:41")?;

    assert!(!page.validate(&bindings)?);
    assert_eq!(page.take_alerts(), vec!["Date field must be filled out"]);

    page.set_field_value("add_obs", "obs_date", "2024-08-11")?;
    assert!(!page.validate(&bindings)?);
    assert_eq!(page.take_alerts(), vec!["Decsription must be filled out"]);

    page.set_field_value("add_obs", "obs_desc", "Perseid maximum, 63 meteors/hr")?;
    assert!(!page.validate(&bindings)?);
    assert_eq!(page.take_alerts(), vec!["Add some files!"]);

    page.set_field_value("add_obs", "content", "/uploads/2024/perseids/plate_041.fits")?;
    assert!(page.validate(&bindings)?);
    assert!(page.take_alerts().is_empty());

    let shown = ops::write_basename(&mut page, "/uploads/2024/perseids/plate_041.fits");
    assert_eq!(shown, "plate_041.fits");
    assert_eq!(page.output(), "plate_041.fits");

    Ok(())
}

#[test]
fn late_session_clock_rolls_past_midnight() -> obs_form_scripts::Result<()> {
    let mut page = Page::from_html("<input id='ntime' name='ntime' type='text'>")?;
    let bindings = PageBindings::default();

    page.set_clock(23, 58)?;
    page.fill_time_field(&bindings)?;
    page.assert_value("ntime", "23:58")?;

    page.advance_clock(7);
    page.fill_time_field(&bindings)?;
    page.assert_value("ntime", "00:05")?;

    Ok(())
}

#[test]
fn textarea_description_seeded_by_the_server_passes_validation() -> obs_form_scripts::Result<()> {
    let html = r#"
    <form name='add_obs'>
      <input name='obs_date' value='2024-03-02'>
      <textarea name='obs_desc'>Lunar occultation of Spica &amp; reappearance timing</textarea>
      <input name='content' type='file' value='occultation.ser'>
    </form>
    "#;

    let mut page = Page::from_html(html)?;
    assert_eq!(
        page.field_value("add_obs", "obs_desc")?,
        "Lunar occultation of Spica & reappearance timing"
    );
    assert!(page.validate(&PageBindings::default())?);
    assert!(page.alerts().is_empty());

    Ok(())
}
